/// Unified error handling for ancla
///
/// Errors raised by the database driver travel through the load balancer as
/// [`BoxError`] and are classified (see [`crate::balancer::classify`]) before
/// any retry decision. Whatever is not retried, or is still failing once the
/// retries run out, reaches the caller unchanged inside [`AnclaError::Query`].

use crate::config::ConfigError;
use thiserror::Error;

/// Boxed error as produced by database drivers and shared caches
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for ancla operations
#[derive(Debug, Error)]
pub enum AnclaError {
    /// Error returned by a database operation, propagated unchanged
    #[error(transparent)]
    Query(BoxError),

    /// The primary did not report a write location
    #[error("Failed to determine the write location of the primary database")]
    WriteLocationUnavailable,

    /// A stored or reported write location could not be parsed
    #[error("Invalid write location: {0}")]
    InvalidWriteLocation(String),

    /// The shared cache backing write-location markers failed
    #[error("Shared cache error: {0}")]
    Cache(BoxError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for ancla operations
pub type AnclaResult<T> = Result<T, AnclaError>;

impl AnclaError {
    /// Wrap a driver error
    pub fn query<E: Into<BoxError>>(error: E) -> Self {
        AnclaError::Query(error.into())
    }

    /// Wrap a shared cache error
    pub fn cache<E: Into<BoxError>>(error: E) -> Self {
        AnclaError::Cache(error.into())
    }

    /// The driver error carried by this error, if any
    pub fn as_query_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            AnclaError::Query(error) => Some(error.as_ref()),
            _ => None,
        }
    }

    /// Consume the error, returning the original driver error if there is one
    pub fn into_query_error(self) -> Result<BoxError, Self> {
        match self {
            AnclaError::Query(error) => Ok(error),
            other => Err(other),
        }
    }
}

/// Error carrying a SQLSTATE code, for drivers that expose one
///
/// Adapters that don't have their own error type can map driver failures onto
/// this and get classification from [`crate::balancer::classify::StandardDriverErrors`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct QueryError {
    sqlstate: String,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl QueryError {
    pub fn new<S: Into<String>, M: Into<String>>(sqlstate: S, message: M) -> Self {
        Self {
            sqlstate: sqlstate.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the error that caused this one
    pub fn caused_by<E: Into<BoxError>>(mut self, source: E) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn sqlstate(&self) -> &str {
        &self.sqlstate
    }
}
