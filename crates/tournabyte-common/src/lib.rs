//! Common utilities for tournabyte
//!
//! This crate provides shared functionality used across all tournabyte crates.

pub mod error;

pub use error::{Result, StoreError};
