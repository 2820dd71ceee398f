//! Error types for kyroid.
//!
//! Errors are strongly typed using thiserror. Resolution-path failures from
//! collaborators (directory, oracle) are logged and degraded rather than
//! surfaced; mutation-path failures propagate through these types.

use thiserror::Error;

use crate::entity::EntityId;
use crate::storage::StorageError;

/// Validation errors that occur during input or configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f32,
    },

    #[error("Entity name cannot be empty")]
    EmptyEntityName,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Invalid merge request: {reason}")]
    InvalidMerge {
        reason: String,
    },
}

/// Execution errors that occur while running an operation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Entity not found: {id}")]
    EntityNotFound {
        id: EntityId,
    },

    #[error("Merge proposal not found: {key}")]
    ProposalNotFound {
        key: String,
    },

    #[error("Entity directory error: {message}")]
    Directory {
        message: String,
    },

    #[error("Merge failed: {reason}")]
    MergeFailed {
        reason: String,
    },
}

/// Top-level error type for kyroid.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl IdentityError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if the error reports a missing entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::EntityNotFound { .. }))
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Directory outages are transient; everything else is not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Directory { .. }))
    }
}

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EntityNotFound(id) => {
                Self::Execution(ExecutionError::EntityNotFound { id })
            }
            other => Self::Execution(ExecutionError::Directory {
                message: other.to_string(),
            }),
        }
    }
}

/// Result type alias for kyroid operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_confidence() {
        let err = ValidationError::ConfidenceOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_execution_error_entity_not_found() {
        let id = EntityId::new();
        let err = ExecutionError::EntityNotFound { id };
        assert!(format!("{err}").contains("Entity not found"));
    }

    #[test]
    fn test_storage_not_found_maps_to_execution_not_found() {
        let id = EntityId::new();
        let err: IdentityError = StorageError::EntityNotFound(id).into();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_backend_error_is_retryable() {
        let err: IdentityError = StorageError::BackendError("timeout".to_string()).into();
        assert!(err.is_execution());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_identity_error_from_validation() {
        let err: IdentityError = ValidationError::EmptyEntityName.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_proposal_not_found_message() {
        let err = ExecutionError::ProposalNotFound {
            key: "a:b".to_string(),
        };
        assert!(err.to_string().contains("a:b"));
    }

    #[test]
    fn test_identity_error_internal() {
        let err = IdentityError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }
}
