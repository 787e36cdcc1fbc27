use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// Usage errors (`InvalidKey`, `NullValue`) are raised before anything reaches
/// a store. Everything else comes from the shared store or from decoding its
/// payloads and is never swallowed by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid cache name: {0:?}")]
    InvalidName(String),

    #[error("Refusing to cache a null value for key {0:?}")]
    NullValue(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cached value has type {found}, requested {expected}")]
    TypeMismatch { expected: String, found: String },

    #[error("Unsupported payload format version {0}")]
    UnsupportedFormat(u8),

    #[error("Malformed invalidation message: {0}")]
    Message(String),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cache {0:?} has been shut down")]
    Shutdown(String),
}

impl CacheError {
    /// Create a new InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    /// Create a new TypeMismatch error
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the caller passed bad arguments (as opposed to a store failure).
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_) | Self::InvalidName(_) | Self::NullValue(_)
        )
    }

    /// Whether the error came from talking to the shared store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Redis(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
