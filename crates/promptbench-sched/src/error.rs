//! Error handling for the batch engine.

use thiserror::Error;

/// Result type for engine operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur during engine operations.
#[derive(Error, Debug)]
pub enum SchedError {
    /// Job not found in the store.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Work item not found in the store.
    #[error("Work item not found: {0}")]
    RowNotFound(String),

    /// SQLite database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Generic persistence error.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Provider failure that escaped the retry executor unexpectedly.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for SchedError {
    fn from(e: rusqlite::Error) -> Self {
        SchedError::DatabaseError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::JobNotFound("job-123".to_string());
        assert_eq!(err.to_string(), "Job not found: job-123");

        let err = SchedError::DatabaseError("locked".to_string());
        assert_eq!(err.to_string(), "Database error: locked");
    }
}
