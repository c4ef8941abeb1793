//! Error types for precache.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum PrecacheError {
    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A network request could not be completed.
    #[error("Network error: {0}")]
    Network(String),

    /// Seeding the cache bucket failed; nothing was stored.
    #[error("Install failed: {0}")]
    Install(String),

    /// A cache bucket could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The worker event loop is gone or dropped a reply.
    #[error("Worker error: {0}")]
    Worker(String),
}

impl From<reqwest::Error> for PrecacheError {
    fn from(err: reqwest::Error) -> Self {
        PrecacheError::Network(err.to_string())
    }
}

impl From<url::ParseError> for PrecacheError {
    fn from(err: url::ParseError) -> Self {
        PrecacheError::Config(format!("invalid URL: {}", err))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PrecacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PrecacheError::Install("./index.html returned 404".into());
        assert_eq!(err.to_string(), "Install failed: ./index.html returned 404");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PrecacheError = io.into();
        assert!(matches!(err, PrecacheError::Io(_)));
    }

    #[test]
    fn test_url_parse_error_is_config() {
        let err: PrecacheError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, PrecacheError::Config(_)));
    }
}
