// for error definitions
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Errors related to the shared store
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Invalid limits, windows or refill rates, reported before the store is touched
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Network level failures talking to the store
    #[error("Store connection error: {0}")]
    Connection(String),

    // Store authentication errors
    #[error("Store authentication error: {0}")]
    Auth(String),

    /// A single command was rejected by the store
    #[error("Store command error: {0}")]
    Command(String),

    /// An atomic transaction (server side script) failed
    #[error("Store script error: {0}")]
    Script(String),

    /// The command did not complete within the configured timeout
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// Reply could not be decoded into the expected shape
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// In-memory store refused a new key
    #[error("Maximum entries limit exceeded ({0})")]
    CapacityExceeded(usize),
}

impl StorageError {
    /// True for failures of the connection itself rather than of a command
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StorageError::Connection(_) | StorageError::Auth(_) | StorageError::Timeout(_)
        )
    }
}

impl From<StorageError> for RateLimiterError {
    fn from(err: StorageError) -> Self {
        RateLimiterError::Storage(err)
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return StorageError::Timeout(err.to_string());
        }
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => StorageError::Auth(err.to_string()),
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                StorageError::Connection(err.to_string())
            }
            redis::ErrorKind::NoScriptError => StorageError::Script(err.to_string()),
            redis::ErrorKind::TypeError => StorageError::Serialization(err.to_string()),
            _ if err.is_connection_dropped() || err.is_connection_refusal() => {
                StorageError::Connection(err.to_string())
            }
            _ if err.to_string().to_lowercase().contains("script") => {
                StorageError::Script(err.to_string())
            }
            _ => StorageError::Command(err.to_string()),
        }
    }
}

// Implement conversions from redis::RedisError to RateLimiterError
impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        RateLimiterError::Storage(StorageError::from(err))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
