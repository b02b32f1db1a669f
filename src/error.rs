//! Error types for the world graph

use std::time::Duration;

use thiserror::Error;

use crate::types::EntitySource;

/// Result type alias for world graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Main error type for the world graph
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Mutation of {entity_id} rejected for source {by}")]
    MutationRejected {
        entity_id: String,
        by: EntitySource,
    },

    #[error("Entity not found: {0}")]
    UnknownEntity(String),

    #[error("Action not found: {0}")]
    UnknownAction(String),

    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Graph service stopped")]
    ServiceStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraphError {
    /// Whether the caller can keep operating on the in-memory graph after this error.
    ///
    /// Persistence and embedding failures degrade durability or recall, never
    /// correctness of the graph itself.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphError::MutationRejected { .. }
                | GraphError::UnknownEntity(_)
                | GraphError::UnknownAction(_)
                | GraphError::VersionMismatch { .. }
                | GraphError::Persistence(_)
                | GraphError::Io(_)
                | GraphError::Embedding(_)
                | GraphError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_names_source() {
        let err = GraphError::MutationRejected {
            entity_id: "user:self".to_string(),
            by: EntitySource::ToolResult,
        };
        assert_eq!(
            err.to_string(),
            "Mutation of user:self rejected for source tool_result"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_service_stopped_is_fatal() {
        assert!(!GraphError::ServiceStopped.is_recoverable());
        assert!(!GraphError::Internal("boom".into()).is_recoverable());
    }
}
