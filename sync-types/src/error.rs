//! Error types for todo-sync wire types.

use thiserror::Error;

/// Errors that can occur while building or (de)serializing sync types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Structurally valid JSON carrying an invalid value
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A required string value was empty
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::Empty("sync code");
        assert_eq!(err.to_string(), "sync code must not be empty");

        let err = TypesError::InvalidData("nonce must be 12 bytes".into());
        assert_eq!(err.to_string(), "invalid data: nonce must be 12 bytes");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
