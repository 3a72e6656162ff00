//! Kernel error types.

use chatfs_types::{CaptionError, MessageId, PathError};
use thiserror::Error;

use crate::store::StoreError;

/// Error returned by mirror, query, sync, and drive operations.
#[derive(Debug, Error)]
pub enum DriveError {
    /// Cluster, file, or folder not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Target already exists, or a guard refused the mutation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed name, path, or caption.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Blob store failure before anything was committed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// One half of a two-phase operation committed, the other failed.
    ///
    /// The intent log still holds the operation; `reconcile` finishes it.
    #[error("{operation} partially applied to message {message_id}: {source}")]
    PartialFailure {
        operation: &'static str,
        message_id: MessageId,
        #[source]
        source: Box<DriveError>,
    },

    /// Mirror database error.
    #[error("mirror error: {0}")]
    Mirror(#[from] rusqlite::Error),
}

impl DriveError {
    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a Conflict error.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    /// Wrap the failure of a second phase.
    pub fn partial(operation: &'static str, message_id: MessageId, source: impl Into<DriveError>) -> Self {
        Self::PartialFailure {
            operation,
            message_id,
            source: Box::new(source.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DriveError::Conflict(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, DriveError::InvalidArgument(_))
    }
}

impl From<PathError> for DriveError {
    fn from(e: PathError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

impl From<CaptionError> for DriveError {
    fn from(e: CaptionError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

/// Kernel result type.
pub type DriveResult<T> = Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_keeps_source() {
        let err = DriveError::partial(
            "permanent_delete",
            MessageId::from("9"),
            StoreError::injected("Delete"),
        );
        let text = err.to_string();
        assert!(text.contains("permanent_delete"));
        assert!(text.contains("9"));
        match err {
            DriveError::PartialFailure { source, .. } => {
                assert!(matches!(*source, DriveError::Store(StoreError::Injected(_))))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_path_errors_are_invalid_arguments() {
        let err: DriveError = PathError::Empty.into();
        assert!(err.is_invalid_argument());
    }
}
