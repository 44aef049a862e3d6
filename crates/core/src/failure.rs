//! Caller-facing failure type shared by every stage of a job.
//!
//! Module errors (`StoreError`, `BackendError`) convert into a [`Failure`]
//! with a stable [`FailureKind`] the response layer can branch on. The
//! `cause` carries diagnostic detail (stderr summaries, paths, io errors)
//! and is meant for logs only.

use serde::{Serialize, Serializer};
use std::fmt;

/// Sub-kind of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFailureKind {
    /// The invocation exceeded its wall-clock budget.
    Timeout,
    /// An external tool exited with a nonzero status.
    NonZeroExit,
    /// An external tool wrote more output than allowed.
    OutputTooLarge,
    /// Zero or several files matched the expected output prefix.
    AmbiguousOutput,
    /// An in-process backend raised an error.
    Error,
}

/// Stable, machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidInput,
    Unauthorized,
    RateLimited,
    Overloaded,
    ResourceExhausted,
    BackendUnavailable,
    BackendFailure(BackendFailureKind),
    NoOutputProduced,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Overloaded => "overloaded",
            FailureKind::ResourceExhausted => "resource_exhausted",
            FailureKind::BackendUnavailable => "backend_unavailable",
            FailureKind::BackendFailure(BackendFailureKind::Timeout) => "backend_timeout",
            FailureKind::BackendFailure(BackendFailureKind::NonZeroExit) => "backend_non_zero_exit",
            FailureKind::BackendFailure(BackendFailureKind::OutputTooLarge) => {
                "backend_output_too_large"
            }
            FailureKind::BackendFailure(BackendFailureKind::AmbiguousOutput) => {
                "backend_ambiguous_output"
            }
            FailureKind::BackendFailure(BackendFailureKind::Error) => "backend_error",
            FailureKind::NoOutputProduced => "no_output_produced",
            FailureKind::Internal => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::BackendFailure(BackendFailureKind::Timeout)
                | FailureKind::ResourceExhausted
                | FailureKind::Overloaded
                | FailureKind::RateLimited
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FailureKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A terminal job failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Human-readable message, safe to return to callers.
    pub message: String,
    /// Diagnostic detail for logs. Never serialized into responses.
    pub cause: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, message)
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::new(
            FailureKind::RateLimited,
            format!("Too many requests, retry in {} ms", retry_after_ms),
        )
    }

    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Overloaded, message)
    }

    pub fn backend(kind: BackendFailureKind, message: impl Into<String>) -> Self {
        Self::new(FailureKind::BackendFailure(kind), message)
    }

    pub fn no_output(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NoOutputProduced, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(FailureKind::InvalidInput.as_str(), "invalid_input");
        assert_eq!(
            FailureKind::BackendFailure(BackendFailureKind::NonZeroExit).as_str(),
            "backend_non_zero_exit"
        );
        assert_eq!(
            serde_json::to_value(FailureKind::BackendFailure(BackendFailureKind::Timeout))
                .unwrap(),
            serde_json::json!("backend_timeout")
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Failure::backend(BackendFailureKind::Timeout, "slow").is_retryable());
        assert!(Failure::new(FailureKind::ResourceExhausted, "full").is_retryable());
        assert!(!Failure::invalid_input("bad").is_retryable());
        assert!(!Failure::backend(BackendFailureKind::NonZeroExit, "exit 1").is_retryable());
    }

    #[test]
    fn test_display_omits_cause() {
        let failure = Failure::backend(BackendFailureKind::NonZeroExit, "tool failed")
            .with_cause("ffmpeg -i /tmp/secret/path");
        let shown = failure.to_string();
        assert_eq!(shown, "backend_non_zero_exit: tool failed");
        assert!(!shown.contains("/tmp/secret"));
    }
}
