//! Artifact handles and lifecycle states.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::job::RequestId;

/// Handle to an artifact within a [`JobScope`](super::JobScope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(pub(crate) usize);

impl ArtifactId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Lifecycle of a temp artifact.
///
/// `Allocated -> Written -> (Published | Discarded)`. An allocated artifact
/// may also be discarded directly. `Published` and `Discarded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Allocated,
    Written,
    Published,
    Discarded,
}

impl ArtifactState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactState::Published | ArtifactState::Discarded)
    }
}

/// A file owned by exactly one job.
#[derive(Debug, Clone)]
pub struct TempArtifact {
    pub(crate) id: ArtifactId,
    pub(crate) owner: RequestId,
    pub(crate) path: PathBuf,
    /// File name stem every file produced for this artifact must start with.
    pub(crate) prefix: String,
    pub(crate) state: ArtifactState,
    /// Bytes charged against the store quota.
    pub(crate) charged_bytes: u64,
}

impl TempArtifact {
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn owner(&self) -> &RequestId {
        &self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    pub fn size_bytes(&self) -> u64 {
        self.charged_bytes
    }
}

/// Where a published artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicRef {
    /// URL path under the public base URL.
    pub url: String,
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the published file.
    pub sha256: String,
}

/// Summary of a scope cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub discarded: usize,
    pub published: usize,
    /// Files found in the job directory that no artifact accounted for.
    pub stray_files: usize,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
