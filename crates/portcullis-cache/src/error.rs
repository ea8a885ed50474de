//! Cache store and rebuild error types.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`CacheStore`](crate::CacheStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A command was issued against a key holding another type.
    #[error("key {key} holds a value of the wrong type")]
    WrongType {
        /// The offending key.
        key: String,
    },
}

impl StoreError {
    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub(crate) fn wrong_type(key: &str) -> Self {
        Self::WrongType {
            key: key.to_string(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Failure reported by a [`CacheSource`](crate::CacheSource).
#[derive(Error, Debug)]
#[error("{message}")]
pub struct SourceError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SourceError {
    /// Creates a source error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a source error wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Errors that abort a rebuild pass.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key pattern names no registered index.
    #[error("unknown cache index: {0}")]
    UnknownCacheIndex(String),

    /// A source function failed; entries written earlier in the pass remain.
    #[error("source for cache index {index} failed: {source}")]
    SourceFailed {
        /// Registry index whose source failed.
        index: String,
        /// Key segments passed to the source.
        segments: Vec<String>,
        /// Sub-keys passed to the source.
        sub_keys: Vec<String>,
        /// The source's error.
        #[source]
        source: SourceError,
    },

    /// The store rejected a delete or write.
    #[error(transparent)]
    Store(#[from] StoreError),
}
