//! Error types for the exception notifier

use thiserror::Error;

/// Result type alias using the notifier's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user-supplied callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for notifier operations
///
/// None of these ever replace the application error that triggered a
/// notification; they describe failures of the notification machinery itself.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Throttle cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error means the deployment cannot honor its configuration
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::Cache(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Cache(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Self::Config(format!("invalid pattern: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_flagged() {
        assert!(Error::config("no shared cache").is_config());
        assert!(!Error::cache("connection refused").is_config());
    }

    #[test]
    fn regex_errors_become_config_errors() {
        let err: Error = regex::Regex::new("(unclosed").unwrap_err().into();
        assert!(err.is_config());
        assert!(err.to_string().starts_with("Configuration error: invalid pattern"));
    }
}
