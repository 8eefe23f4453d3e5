//! Error types for the matchup store

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, MatchupError>;

#[derive(Error, Debug)]
pub enum MatchupError {
    /// Every write pass for an execution had at least one failed row.
    #[error("Result write failed for execution {execution_id}: {rows} rows, {attempts} attempts exhausted")]
    WriteFailed {
        execution_id: Uuid,
        rows: usize,
        attempts: u32,
    },

    #[error("Execution not found with id '{0}'")]
    ExecutionNotFound(Uuid),

    /// A stored row matches neither the current nor the legacy layout.
    #[error("Cannot decode row {row_id}: {reason}")]
    Decode { row_id: String, reason: String },

    #[error("Invalid execution id: {0}")]
    InvalidExecutionId(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failure reported by the store for a single operation.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MatchupError {
    /// Get error code for diagnostics and CLI exit reporting
    pub fn code(&self) -> &'static str {
        match self {
            MatchupError::WriteFailed { .. } => "WRITE_FAILED",
            MatchupError::ExecutionNotFound(_) => "EXECUTION_NOT_FOUND",
            MatchupError::Decode { .. } => "DECODE_ERROR",
            MatchupError::InvalidExecutionId(_) => "INVALID_EXECUTION_ID",
            MatchupError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            MatchupError::Config(_) => "INVALID_CONFIG",
            _ => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn decode(row_id: impl ToString, reason: impl Into<String>) -> Self {
        MatchupError::Decode {
            row_id: row_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = Uuid::nil();
        assert_eq!(
            MatchupError::WriteFailed { execution_id: id, rows: 3, attempts: 5 }.code(),
            "WRITE_FAILED"
        );
        assert_eq!(MatchupError::ExecutionNotFound(id).code(), "EXECUTION_NOT_FOUND");
        assert_eq!(MatchupError::decode("r1", "bad").code(), "DECODE_ERROR");
        assert_eq!(MatchupError::Store("boom".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_write_failed_message_has_no_row_detail() {
        let err = MatchupError::WriteFailed {
            execution_id: Uuid::nil(),
            rows: 12,
            attempts: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("12 rows"));
        assert!(msg.contains("5 attempts"));
    }

    #[test]
    fn test_not_found_message_names_execution() {
        let id = Uuid::new_v4();
        let msg = MatchupError::ExecutionNotFound(id).to_string();
        assert!(msg.contains(&id.to_string()));
    }
}
