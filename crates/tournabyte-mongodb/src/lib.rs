//! MongoDB query documents and connection lifecycle for tournabyte
//!
//! This crate builds the request shapes handed to the MongoDB driver and
//! manages the driver handle around them.
//!
//! # Features
//! - Functional, fail-fast configuration options for clients and operations
//! - Expression nodes for sort, projection, filter and update documents
//! - Health-checked connections with an injectable client factory
//! - Sequential multi-operation runs on one session
//!
//! Query execution and pooling stay with the `mongodb` driver.

pub mod client;
pub mod connection;
pub mod expr;
pub mod options;
pub mod session;
pub mod settings;

pub use client::{mongo_client_factory, ClientFactory, DriverClient};
pub use connection::{Connection, DEFAULT_HEALTH_CHECK_TIMEOUT};
pub use expr::{merge, CompositeDocument, Expression, Filter, Node, Projection, SortKey, UpdateInstruction};
pub use options::{apply_options, connect_opts_with, ConfigOption, ConnectionOption, Validate};
pub use session::{operation, BoxedOperation, SessionOperation};
pub use settings::DatabaseSettings;
pub use tournabyte_common::{Result, StoreError};
pub use tokio_util::sync::CancellationToken;
