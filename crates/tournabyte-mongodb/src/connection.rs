//! MongoDB connection lifecycle with a bounded health check
//!
//! A [`Connection`] only exists once its driver handle answered a ping. If
//! the ping fails or runs past its deadline the handle is torn down before
//! the error is returned.

use std::fmt;
use std::time::Duration;

use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::{mongo_client_factory, ClientFactory, DriverClient};
use crate::options::{connect_opts_with, ConnectionOption};
use crate::settings::DatabaseSettings;
use crate::{Result, StoreError};

/// Health check bound used when no connect timeout is configured
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A health-checked driver handle plus the options that built it
pub struct Connection<C: DriverClient = Client> {
    client: C,
    options: ClientOptions,
}

impl<C: DriverClient> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("hosts", &self.options.hosts)
            .field("app_name", &self.options.app_name)
            .finish_non_exhaustive()
    }
}

impl Connection<Client> {
    /// Connect with the production driver
    pub async fn connect(options: impl IntoIterator<Item = ConnectionOption>) -> Result<Self> {
        Self::connect_with(&mongo_client_factory, &CancellationToken::new(), options).await
    }

    /// Connect using a deserialized settings section
    pub async fn from_settings(settings: &DatabaseSettings) -> Result<Self> {
        Self::connect(settings.connection_options()).await
    }

    /// Get a database handle by name
    pub fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    /// Get a typed collection
    pub fn collection<T: Send + Sync>(&self, database: &str, name: &str) -> Collection<T> {
        self.client.database(database).collection(name)
    }
}

impl<C: DriverClient> Connection<C> {
    /// Apply `options`, build a handle with `factory` and health check it.
    ///
    /// # Errors
    ///
    /// - the first failing option's error, or `ConfigValidation`
    /// - the factory's error, unchanged; no ping is attempted
    /// - `HealthCheck` when the ping fails or exceeds the connect timeout
    ///   (5 seconds if unset)
    /// - `Cancelled` when `cancel` fires during the health check
    ///
    /// The handle is torn down before either of the last two is returned.
    #[instrument(skip_all)]
    pub async fn connect_with<F>(
        factory: &F,
        cancel: &CancellationToken,
        options: impl IntoIterator<Item = ConnectionOption>,
    ) -> Result<Self>
    where
        F: ClientFactory<Client = C>,
    {
        let options = connect_opts_with(options)?;
        let client = factory.build(options.clone())?;

        let deadline = options.connect_timeout.unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT);
        let ping = tokio::time::timeout(deadline, client.ping(options.selection_criteria.clone()));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled("health check".to_string())),
            result = ping => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(StoreError::HealthCheck(reason))) => Err(StoreError::HealthCheck(reason)),
                Ok(Err(err)) => Err(StoreError::HealthCheck(err.to_string())),
                Err(_) => Err(StoreError::HealthCheck(format!(
                    "no ping response within {}ms",
                    deadline.as_millis()
                ))),
            },
        };

        if let Err(err) = outcome {
            warn!(error = %err, "Health check failed, tearing down client");
            if let Err(teardown_err) = client.teardown().await {
                warn!(error = %teardown_err, "Teardown after failed health check also failed");
            }
            return Err(err);
        }

        info!(hosts = ?options.hosts, app_name = ?options.app_name, "Connection established");
        Ok(Self { client, options })
    }

    /// Get a reference to the driver handle
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Options the handle was built with
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Release the driver handle.
    ///
    /// Waits for the driver to close its pool unless `cancel` fires first, in
    /// which case the handle is dropped without waiting and `Cancelled` is
    /// returned.
    #[instrument(skip_all)]
    pub async fn disconnect(self, cancel: &CancellationToken) -> Result<()> {
        info!(hosts = ?self.options.hosts, "Disconnecting");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Disconnect cancelled, dropping client without waiting");
                Err(StoreError::Cancelled("disconnect".to_string()))
            }
            result = self.client.teardown() => result,
        }
    }
}
