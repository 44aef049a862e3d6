//! Error types for the temp artifact store.

use std::path::{Path, PathBuf};
use thiserror::Error;

use super::artifact::ArtifactState;
use crate::failure::{Failure, FailureKind};

/// Errors that can occur while managing job artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store-wide byte quota or per-job artifact limit reached.
    #[error("Scratch quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    /// The filesystem reported no space left.
    #[error("Storage full at {path}")]
    StorageFull { path: PathBuf },

    /// Handle does not belong to this scope.
    #[error("Unknown artifact #{0}")]
    UnknownArtifact(usize),

    /// Operation not allowed in the artifact's current state.
    #[error("Artifact #{id} is {state:?}, expected {expected}")]
    InvalidState {
        id: usize,
        state: ArtifactState,
        expected: &'static str,
    },

    /// The artifact's backing file is missing or empty.
    #[error("Artifact output missing or empty: {path}")]
    MissingOutput { path: PathBuf },

    /// A produced file does not match the artifact's requestId-scoped prefix.
    #[error("File {path} is outside the artifact namespace")]
    OutsideNamespace { path: PathBuf },

    /// Moving the artifact to the public directory failed.
    #[error("Failed to publish {source_path} to {destination}")]
    PublishFailed {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the filesystem ran out of space or quota.
pub(crate) fn is_out_of_space(error: &std::io::Error) -> bool {
    // ENOSPC (28) and EDQUOT (122) on Linux
    error.kind() == std::io::ErrorKind::StorageFull
        || matches!(error.raw_os_error(), Some(28) | Some(122))
}

impl StoreError {
    /// Maps an io error, recognizing out-of-space conditions.
    pub(crate) fn from_io(error: std::io::Error, path: &Path) -> Self {
        if is_out_of_space(&error) {
            Self::StorageFull {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io(error)
        }
    }

    /// Whether this error means the store ran out of room.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. } | Self::StorageFull { .. })
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        let cause = err.to_string();
        let failure = match err {
            StoreError::QuotaExceeded { .. } | StoreError::StorageFull { .. } => Failure::new(
                FailureKind::ResourceExhausted,
                "Temporary storage is exhausted, try again later",
            ),
            StoreError::MissingOutput { .. } => {
                Failure::no_output("The conversion finished without producing a result")
            }
            _ => Failure::internal("Internal storage error"),
        };
        failure.with_cause(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_maps_to_resource_exhausted() {
        let failure: Failure = StoreError::QuotaExceeded {
            reason: "2 GiB in use".to_string(),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::ResourceExhausted);
        assert!(failure.is_retryable());
        assert!(failure.cause.unwrap().contains("2 GiB"));
    }

    #[test]
    fn test_from_io_storage_full() {
        let err = StoreError::from_io(
            std::io::Error::from(std::io::ErrorKind::StorageFull),
            Path::new("/scratch/x"),
        );
        assert!(err.is_exhaustion());

        let err = StoreError::from_io(
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            Path::new("/scratch/x"),
        );
        assert!(!err.is_exhaustion());

        let err = StoreError::from_io(std::io::Error::from_raw_os_error(28), Path::new("/x"));
        assert!(matches!(err, StoreError::StorageFull { .. }));
    }

    #[test]
    fn test_missing_output_message_hides_path() {
        let failure: Failure = StoreError::MissingOutput {
            path: PathBuf::from("/scratch/abc/abc-1.mp3"),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::NoOutputProduced);
        assert!(!failure.message.contains("/scratch"));
    }
}
