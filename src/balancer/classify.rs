/// Classification of database errors for retry decisions
///
/// Drivers wrap errors in each other freely (a statement error caused by a
/// broken socket, a pool error caused by a refused connection), so the
/// classifier looks at the whole `source()` chain. A [`DriverErrors`]
/// implementation only has to recognise the individual error types.
use std::error::Error;
use std::io;
use std::sync::Arc;

use crate::error::QueryError;

/// Message prefix drivers use when setting the client encoding fails because
/// the connection broke mid-handshake
pub const INVALID_ENCODING_PREFIX: &str = "invalid encoding name:";

/// What the load balancer should do about an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The server can't be used: take the host offline or back off
    Connection,
    /// A replica query was cancelled by replay; try another host
    SerializationConflict,
    /// Anything else; never retried
    Other,
}

/// Recognises one driver's error types
pub trait DriverErrors: Send + Sync {
    /// Classify a single error without looking at its sources
    ///
    /// `None` means the error is not one the driver knows (a wrapper, say)
    /// and classification should continue with its source.
    fn classify(&self, error: &(dyn Error + 'static)) -> Option<ErrorClass>;
}

/// Classifies `std::io` errors and SQLSTATE-carrying [`QueryError`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDriverErrors;

impl DriverErrors for StandardDriverErrors {
    fn classify(&self, error: &(dyn Error + 'static)) -> Option<ErrorClass> {
        if let Some(error) = error.downcast_ref::<io::Error>() {
            return match error.kind() {
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::TimedOut
                | io::ErrorKind::UnexpectedEof => Some(ErrorClass::Connection),
                _ => None,
            };
        }

        let error = error.downcast_ref::<QueryError>()?;
        let sqlstate = error.sqlstate();
        match sqlstate {
            "40001" => Some(ErrorClass::SerializationConflict),
            // invalid_catalog_name: the database is missing, reconnecting won't help
            "3D000" => Some(ErrorClass::Other),
            // admin_shutdown, crash_shutdown, cannot_connect_now
            "57P01" | "57P02" | "57P03" => Some(ErrorClass::Connection),
            _ if sqlstate.starts_with("08") => Some(ErrorClass::Connection),
            _ => None,
        }
    }
}

/// Walks error chains and applies a [`DriverErrors`] to each link
#[derive(Clone)]
pub struct ErrorClassifier {
    driver: Arc<dyn DriverErrors>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(StandardDriverErrors))
    }
}

impl ErrorClassifier {
    pub fn new(driver: Arc<dyn DriverErrors>) -> Self {
        Self { driver }
    }

    /// Overall class of `error`; conflicts take precedence over connection errors
    pub fn classify(&self, error: &(dyn Error + 'static)) -> ErrorClass {
        if self.is_serialization_failure(error) {
            ErrorClass::SerializationConflict
        } else if self.is_connection_error(error) {
            ErrorClass::Connection
        } else {
            ErrorClass::Other
        }
    }

    /// Whether `error`, or what it wraps, means the server is unusable
    ///
    /// The first link the driver recognises decides. Unrecognised links whose
    /// message starts with [`INVALID_ENCODING_PREFIX`] count as connection
    /// errors too.
    pub fn is_connection_error(&self, error: &(dyn Error + 'static)) -> bool {
        let mut current = Some(error);

        while let Some(error) = current {
            match self.driver.classify(error) {
                Some(class) => return class == ErrorClass::Connection,
                None if error.to_string().starts_with(INVALID_ENCODING_PREFIX) => return true,
                None => current = error.source(),
            }
        }

        false
    }

    /// Whether the innermost cause of `error` is a serialization failure
    pub fn is_serialization_failure(&self, error: &(dyn Error + 'static)) -> bool {
        let mut root = error;
        while let Some(source) = root.source() {
            root = source;
        }

        self.driver.classify(root) == Some(ErrorClass::SerializationConflict)
    }
}
