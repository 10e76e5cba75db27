//! Error types for mmscore.

use thiserror::Error;

/// Main error type for mmscore.
#[derive(Error, Debug)]
pub enum MmError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Scores table not found in {0}. Create the combination database first.")]
    MissingScoresTable(String),

    #[error("Emodel '{emodel}' not found in model registry (looked up as '{base}')")]
    ModelNotFound { emodel: String, base: String },

    #[error("Emodel '{0}' has no parameters in final.json")]
    MissingParameters(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Failed to persist result for combination {id}: {source}")]
    Persist {
        id: i64,
        #[source]
        source: rusqlite::Error,
    },
}

/// Result type alias for mmscore operations.
pub type Result<T> = std::result::Result<T, MmError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_model_not_found_message() {
        let err = MmError::ModelNotFound {
            emodel: "cADpyr_L5PC_legacy".to_string(),
            base: "cADpyr_L5PC".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cADpyr_L5PC_legacy"));
        assert!(msg.contains("looked up as 'cADpyr_L5PC'"));
    }

    #[test]
    fn test_missing_scores_table_message() {
        let err = MmError::MissingScoresTable("/tmp/scores.sqlite".to_string());
        assert!(err.to_string().contains("/tmp/scores.sqlite"));
    }

    #[test]
    fn test_persist_error_keeps_source() {
        let err = MmError::Persist {
            id: 42,
            source: rusqlite::Error::InvalidQuery,
        };
        assert!(err.to_string().contains("combination 42"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: MmError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope }").unwrap_err();
        let err: MmError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn test_worker_error_message() {
        let err = MmError::Worker("pipe closed".to_string());
        assert_eq!(err.to_string(), "Worker error: pipe closed");
    }
}
