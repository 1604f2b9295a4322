use std::io;
use std::time::Duration;

/// Unified error type for QuotaGate operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from network operations
    #[error("IO error: {0}")]
    Io(#[source] io::Error),

    /// RESP protocol parsing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unknown command received
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Connection closed by peer
    #[error("Connection closed")]
    ConnectionClosed,

    /// Incomplete frame (need more data)
    #[error("Incomplete frame")]
    Incomplete,

    /// Invalid command argument type or value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Caller input rejected before touching the store
    #[error("validation failed: {0}")]
    Validation(String),

    /// No rule exists for the tenant/resource pair
    #[error("no rate limit rule for tenant {tenant:?} resource {resource:?}")]
    PolicyNotFound { tenant: String, resource: String },

    /// Store operation against a key holding another value type
    #[error("WRONGTYPE operation against a key holding the wrong kind of value")]
    WrongType,

    /// The store could not execute or confirm the operation
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store round trip exceeded its deadline; the remote operation may
    /// still have committed
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Coarse classification used to map errors onto caller-facing outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input, never retried
    Validation,
    /// Missing policy
    NotFound,
    /// Store or transport failure, fail-closed
    Store,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::PolicyNotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Store,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn store(msg: impl Into<String>) -> Self {
        Error::StoreUnavailable(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(e)
        }
    }
}

/// Result type alias for QuotaGate operations
pub type Result<T> = std::result::Result<T, Error>;
