//! Index engine error types.

use thiserror::Error;

/// Errors that can occur inside an ANN engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend index error
    #[error("Index error: {0}")]
    Index(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector buffer length does not match the declared count
    #[error("Invalid batch: {count} vectors declared but buffer holds {values} values")]
    InvalidBatch { count: usize, values: usize },

    /// Engine must be trained before vectors can be added
    #[error("Index is not trained")]
    NotTrained,

    /// Engine was closed
    #[error("Index is closed")]
    Closed,

    /// No engine file at the given location
    #[error("Index file not found: {0}")]
    FileNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 4, got 3");

        let err = EngineError::InvalidBatch {
            count: 2,
            values: 7,
        };
        assert!(err.to_string().contains("2 vectors declared"));
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: EngineError = json_err.into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
