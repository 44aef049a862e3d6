//! Backend error types.

use std::time::Duration;
use thiserror::Error;

use crate::failure::{BackendFailureKind, Failure, FailureKind};
use crate::job::JobKind;
use crate::store::is_out_of_space;

/// Errors raised while invoking a conversion backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No backend is registered for the job kind.
    #[error("No backend registered for {0}")]
    NotRegistered(JobKind),

    /// A required external tool is missing.
    #[error("{tool} is not available: {reason}")]
    Unavailable { tool: String, reason: String },

    /// The invocation exceeded its wall-clock budget.
    #[error("{tool} timed out after {budget:?}")]
    Timeout { tool: String, budget: Duration },

    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with code {code:?}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// An external tool wrote more than the capture limit.
    #[error("{tool} wrote more than {limit} bytes of output")]
    OutputTooLarge { tool: String, limit: usize },

    /// Zero or several files matched the output prefix.
    #[error("Expected exactly one output with prefix {prefix}, found {found}")]
    AmbiguousOutput { prefix: String, found: usize },

    /// The backend reported success without a usable result.
    #[error("No output produced: {0}")]
    NoOutput(String),

    /// The invocation was cancelled at a safe point.
    #[error("Invocation cancelled")]
    Cancelled,

    /// An in-process backend raised an error.
    #[error("Backend error: {0}")]
    Failed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<BackendError> for Failure {
    fn from(err: BackendError) -> Self {
        let cause = err.to_string();
        let failure = match err {
            BackendError::NotRegistered(_) | BackendError::Unavailable { .. } => Failure::new(
                FailureKind::BackendUnavailable,
                "This conversion is not available on this server",
            ),
            BackendError::Timeout { .. } | BackendError::Cancelled => Failure::backend(
                BackendFailureKind::Timeout,
                "The conversion took too long and was stopped",
            ),
            BackendError::NonZeroExit { .. } => Failure::backend(
                BackendFailureKind::NonZeroExit,
                "The conversion tool could not process the input",
            ),
            BackendError::OutputTooLarge { .. } => Failure::backend(
                BackendFailureKind::OutputTooLarge,
                "The conversion tool produced too much output",
            ),
            BackendError::AmbiguousOutput { .. } => Failure::backend(
                BackendFailureKind::AmbiguousOutput,
                "The conversion did not produce a single result file",
            ),
            BackendError::NoOutput(_) => {
                Failure::no_output("The conversion finished without producing a result")
            }
            BackendError::Failed(message) => {
                Failure::backend(BackendFailureKind::Error, format!("Conversion failed: {}", message))
            }
            BackendError::Io(e) if is_out_of_space(&e) => Failure::new(
                FailureKind::ResourceExhausted,
                "Temporary storage is exhausted, try again later",
            ),
            BackendError::Io(_) => Failure::backend(BackendFailureKind::Error, "Conversion failed"),
        };
        failure.with_cause(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_hides_stderr() {
        let failure: Failure = BackendError::NonZeroExit {
            tool: "ffmpeg".to_string(),
            code: Some(1),
            stderr: "/scratch/abc/abc-1.mp4: Invalid data found".to_string(),
        }
        .into();
        assert_eq!(
            failure.kind,
            FailureKind::BackendFailure(BackendFailureKind::NonZeroExit)
        );
        assert!(!failure.message.contains("/scratch"));
        assert!(failure.cause.unwrap().contains("Invalid data"));
    }

    #[test]
    fn test_unavailable_and_cancelled() {
        let failure: Failure = BackendError::Unavailable {
            tool: "yt-dlp".to_string(),
            reason: "not found on PATH".to_string(),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::BackendUnavailable);

        let failure: Failure = BackendError::Cancelled.into();
        assert!(failure.is_retryable());
    }

    #[test]
    fn test_disk_full_is_resource_exhausted() {
        let failure: Failure = BackendError::Io(std::io::Error::from_raw_os_error(28)).into();
        assert_eq!(failure.kind, FailureKind::ResourceExhausted);
        assert!(failure.is_retryable());

        let failure: Failure =
            BackendError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).into();
        assert_eq!(
            failure.kind,
            FailureKind::BackendFailure(BackendFailureKind::Error)
        );
    }
}
