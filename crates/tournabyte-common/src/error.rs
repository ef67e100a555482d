//! Error types for tournabyte

use thiserror::Error;

/// Result type alias for tournabyte operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for the data store core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A single configuration option rejected its input
    #[error("Option error: {0}")]
    OptionApplication(String),

    /// The fully applied configuration is internally inconsistent
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// The driver client could not be constructed
    #[error("Connection error: {0}")]
    ConnectionEstablishment(String),

    /// The liveness ping failed or ran past its deadline
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    /// A session could not be acquired from the driver
    #[error("Session error: {0}")]
    SessionStart(String),

    /// The caller cancelled an in-flight call
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A composite document named the same key twice
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns true if this error happened while bringing a connection up.
    ///
    /// Services usually treat these as fatal at startup.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            StoreError::OptionApplication(_)
                | StoreError::ConfigValidation(_)
                | StoreError::ConnectionEstablishment(_)
                | StoreError::HealthCheck(_)
        )
    }

    /// Returns true if re-running the whole session may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::SessionStart(_) | StoreError::Cancelled(_) | StoreError::MongoDB(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Deserialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        StoreError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
