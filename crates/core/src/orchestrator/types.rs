//! Orchestrator types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::failure::Failure;
use crate::job::{JobKind, RequestId};
use crate::store::CleanupReport;

/// Per-job state machine.
///
/// `Admitted -> Validating -> SlotAcquired -> Running -> (Succeeded | Failed) -> Cleaned`.
/// Validation and slot failures go straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Admitted,
    Validating,
    SlotAcquired,
    Running,
    Succeeded,
    Failed,
    Cleaned,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Admitted => "admitted",
            JobState::Validating => "validating",
            JobState::SlotAcquired => "slot_acquired",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cleaned => "cleaned",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published file, as handed to the response layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactResult {
    /// Resolvable by the public file server.
    pub url: String,
    /// Suggested download name.
    pub file_name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub sha256: String,
}

/// Successful job output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionResult {
    Inline { payload: serde_json::Value },
    Artifact(ArtifactResult),
}

impl ConversionResult {
    pub fn artifact(&self) -> Option<&ArtifactResult> {
        match self {
            ConversionResult::Artifact(artifact) => Some(artifact),
            ConversionResult::Inline { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            ConversionResult::Inline { payload } => Some(payload),
            ConversionResult::Artifact(_) => None,
        }
    }
}

/// Everything known about a finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub request_id: RequestId,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Result<ConversionResult, Failure>,
    pub cleanup: CleanupReport,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// `"succeeded"` or the failure kind.
    pub fn result_label(&self) -> &'static str {
        match &self.outcome {
            Ok(_) => "succeeded",
            Err(failure) => failure.kind.as_str(),
        }
    }
}

/// Receives every state transition of every job.
pub trait JobObserver: Send + Sync {
    fn on_transition(&self, request_id: &RequestId, kind: JobKind, state: JobState);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_serialization_is_tagged() {
        let inline = ConversionResult::Inline {
            payload: json!({"audio_url": "https://x"}),
        };
        assert_eq!(
            serde_json::to_value(&inline).unwrap(),
            json!({"type": "inline", "payload": {"audio_url": "https://x"}})
        );

        let artifact = ConversionResult::Artifact(ArtifactResult {
            url: "/files/a.jpg".to_string(),
            file_name: "photo.jpg".to_string(),
            size_bytes: 10,
            content_type: "image/jpeg".to_string(),
            sha256: "00".to_string(),
        });
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["type"], "artifact");
        assert_eq!(value["content_type"], "image/jpeg");
        assert!(artifact.artifact().is_some());
        assert!(artifact.payload().is_none());
    }
}
