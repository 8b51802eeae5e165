//! Error types for palimpsest.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared by all palimpsest crates.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The document has no generation flagged current, so there is nothing
    /// to reprocess from.
    #[error("No current chunk generation for document: {0}")]
    NoCurrentGeneration(Uuid),

    /// No newer generation exists to promote, or a named generation is
    /// missing entirely.
    #[error("No pending chunk generation for document: {0}")]
    NoPendingGeneration(Uuid),

    /// Annotation recovery produced an inconsistent outcome.
    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_errors_name_the_document() {
        let id = Uuid::new_v4();
        let current = Error::NoCurrentGeneration(id);
        let pending = Error::NoPendingGeneration(id);
        assert!(current.to_string().contains(&id.to_string()));
        assert!(pending.to_string().contains("pending"));
    }

    #[test]
    fn test_serde_json_error_converts() {
        let err: Error = serde_json::from_str::<i32>("not a number").unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            other => panic!("expected Serialization, got {other:?}"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_bounds<T: Send + Sync>() {}
        assert_bounds::<Error>();
    }
}
