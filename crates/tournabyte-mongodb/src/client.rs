//! Driver seam: the handle a `Connection` owns and the factory that builds it
//!
//! `mongodb::Client` implements [`DriverClient`] and [`mongo_client_factory`]
//! is the production [`ClientFactory`]. Tests plug in their own
//! implementations to inject failures without any network.

use async_trait::async_trait;
use bson::doc;
use mongodb::options::{ClientOptions, SelectionCriteria};
use mongodb::{Client, ClientSession};

use crate::{Result, StoreError};

/// Operations the connection lifecycle needs from a driver handle
#[async_trait]
pub trait DriverClient: Send + Sync + Sized + 'static {
    /// Session bound to this handle
    type Session: Send + 'static;

    /// Liveness check
    async fn ping(&self, criteria: Option<SelectionCriteria>) -> Result<()>;

    /// Start a new session
    async fn acquire_session(&self) -> Result<Self::Session>;

    /// End a session. Called exactly once per acquired session.
    fn release_session(&self, session: Self::Session);

    /// Close the handle and everything it pools
    async fn teardown(self) -> Result<()>;
}

/// Builds a driver handle from validated options
pub trait ClientFactory {
    type Client: DriverClient;

    fn build(&self, options: ClientOptions) -> Result<Self::Client>;
}

impl<F, C> ClientFactory for F
where
    F: Fn(ClientOptions) -> Result<C>,
    C: DriverClient,
{
    type Client = C;

    fn build(&self, options: ClientOptions) -> Result<C> {
        self(options)
    }
}

/// Production factory backed by `mongodb::Client::with_options`
pub fn mongo_client_factory(options: ClientOptions) -> Result<Client> {
    Client::with_options(options).map_err(|e| StoreError::ConnectionEstablishment(e.to_string()))
}

#[async_trait]
impl DriverClient for Client {
    type Session = ClientSession;

    async fn ping(&self, criteria: Option<SelectionCriteria>) -> Result<()> {
        let admin = self.database("admin");
        let mut command = admin.run_command(doc! { "ping": 1 });
        if let Some(criteria) = criteria {
            command = command.selection_criteria(criteria);
        }
        command
            .await
            .map(|_| ())
            .map_err(|e| StoreError::HealthCheck(format!("Ping failed: {}", e)))
    }

    async fn acquire_session(&self) -> Result<ClientSession> {
        self.start_session()
            .await
            .map_err(|e| StoreError::SessionStart(e.to_string()))
    }

    fn release_session(&self, session: ClientSession) {
        // The driver ends the server session when the handle is dropped.
        drop(session);
    }

    async fn teardown(self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}
