use crate::factory::BackendError;
use crate::pool::PoolError;
use crate::row;
use crate::value::EncodeError;

/// Error is the failure type returned by every cache operation.
///
/// Absence of an entry is never an error: lookups return `Ok(None)`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A caller-supplied partition, key, parent reference or range was rejected
    /// before or by the backend.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration value was out of range at engine construction.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller's value could not be serialized for storage.
    #[error("serialization failed: {0}")]
    Serialization(#[from] EncodeError),

    /// The entries table exists but does not have the expected shape.
    #[error("cache schema is incompatible: {0}")]
    SchemaIncompatible(String),

    /// The backend could not be reached, or a connection could not be
    /// obtained in time. Retryable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stored row could not be interpreted.
    #[error("invalid cache data: {0}")]
    InvalidData(String),

    /// The engine was closed; construct a new one to keep caching.
    #[error("cache has been disposed")]
    Disposed,
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::ForeignKeyViolation(m) => {
                Error::InvalidArgument(format!("parent key does not exist: {m}"))
            }
            BackendError::Unavailable(m) => Error::BackendUnavailable(m),
            BackendError::UniqueViolation(m) | BackendError::Other(m) => {
                Error::BackendUnavailable(m)
            }
        }
    }
}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::CheckoutTimeout => {
                Error::BackendUnavailable("connection checkout timed out".to_string())
            }
            PoolError::Closed => Error::Disposed,
            PoolError::Backend(e) => e.into(),
        }
    }
}

impl From<row::Error> for Error {
    fn from(e: row::Error) -> Self {
        Error::InvalidData(e.to_string())
    }
}
