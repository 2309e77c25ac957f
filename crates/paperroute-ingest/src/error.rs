//! Error types for the ingestion pipeline.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] paperroute_db::DbError),

    #[error("Config error: {0}")]
    Config(#[from] paperroute_config::ConfigError),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// A collaborator failed in a way that may succeed later.
    #[error("{operation} failed transiently: {message}")]
    TransientCollaborator { operation: String, message: String },

    /// A collaborator failed permanently or exhausted its retries.
    #[error("{operation} failed: {message}")]
    PermanentCollaborator { operation: String, message: String },

    /// Neither extraction produced any text.
    #[error("No extraction succeeded for {0}")]
    UnreadableDocument(PathBuf),

    /// Classification output that could not be mechanically corrected.
    #[error("Invalid classification output: {0}")]
    InvalidClassification(String),

    #[error("No free name for {path} within {ceiling} attempts")]
    PlacementCollisionExhausted { path: PathBuf, ceiling: u32 },

    #[error("Malformed artifact {path}: {message}")]
    MalformedArtifact { path: PathBuf, message: String },
}

impl IngestError {
    /// Stable identifier of the error kind, used in logs and job records.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Io(_) => "io",
            IngestError::Database(_) => "database",
            IngestError::Config(_) => "config",
            IngestError::Watch(_) => "watch",
            IngestError::Task(_) => "task",
            IngestError::FileNotFound(_) => "file_not_found",
            IngestError::TransientCollaborator { .. } => "transient_collaborator",
            IngestError::PermanentCollaborator { .. } => "permanent_collaborator",
            IngestError::UnreadableDocument(_) => "unreadable_document",
            IngestError::InvalidClassification(_) => "invalid_classification",
            IngestError::PlacementCollisionExhausted { .. } => "placement_collision_exhausted",
            IngestError::MalformedArtifact { .. } => "malformed_artifact",
        }
    }

    pub(crate) fn collaborator(operation: &str, error: CollaboratorError) -> Self {
        match error {
            CollaboratorError::Permanent(message) => IngestError::PermanentCollaborator {
                operation: operation.to_string(),
                message,
            },
            other => IngestError::TransientCollaborator {
                operation: operation.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Failure of a single external collaborator call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Timeout-like or server-side failure; retrying may help.
    #[error("transient: {0}")]
    Transient(String),

    /// Failure that retrying will not fix.
    #[error("permanent: {0}")]
    Permanent(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Transient(_) | CollaboratorError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_mapping() {
        let err = IngestError::collaborator("classify", CollaboratorError::Permanent("400".into()));
        assert_eq!(err.kind(), "permanent_collaborator");

        let err = IngestError::collaborator(
            "index",
            CollaboratorError::Timeout(Duration::from_secs(1)),
        );
        assert_eq!(err.kind(), "transient_collaborator");
        assert!(err.to_string().starts_with("index failed transiently"));
    }

    #[test]
    fn test_retryable() {
        assert!(CollaboratorError::Transient("503".into()).is_retryable());
        assert!(CollaboratorError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(!CollaboratorError::Permanent("400".into()).is_retryable());
    }
}
