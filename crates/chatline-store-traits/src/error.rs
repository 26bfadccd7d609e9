//! Error types for remote store operations

use thiserror::Error;

/// Error type for remote store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The path is not addressable
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Other error
    #[error("error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether this error means the backing store is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Connectivity("socket closed".to_string());
        assert_eq!(err.to_string(), "connectivity error: socket closed");

        let err = StoreError::Serialization("invalid json".to_string());
        assert_eq!(err.to_string(), "serialization error: invalid json");

        let err = StoreError::InvalidPath("chats//x".to_string());
        assert_eq!(err.to_string(), "invalid path: chats//x");

        let err = StoreError::Other("unexpected".to_string());
        assert_eq!(err.to_string(), "error: unexpected");
    }

    #[test]
    fn test_is_connectivity() {
        assert!(StoreError::Connectivity("down".into()).is_connectivity());
        assert!(!StoreError::Other("x".into()).is_connectivity());
    }
}
