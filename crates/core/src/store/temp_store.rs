//! Job-scoped temp artifact store on the local filesystem.
//!
//! Every job gets a private directory `<scratch_dir>/<request_id>/` holding
//! files named `<request_id>-<random>[.<suffix>]`. The directory is created
//! on first write and removed by [`JobScope::cleanup`], or by `Drop` when a
//! scope is abandoned without cleanup.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::artifact::{ArtifactId, ArtifactState, CleanupReport, PublicRef, TempArtifact};
use super::error::{is_out_of_space, StoreError};
use crate::config::StorageConfig;
use crate::job::RequestId;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

struct StoreInner {
    config: StorageConfig,
    bytes_in_use: AtomicU64,
}

impl StoreInner {
    /// Charges `bytes` against the store quota.
    fn reserve(&self, bytes: u64) -> Result<(), StoreError> {
        let limit = self.config.max_scratch_bytes;
        self.bytes_in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|current| StoreError::QuotaExceeded {
                reason: format!(
                    "{} of {} bytes in use, {} more requested",
                    current, limit, bytes
                ),
            })
    }

    fn release(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let _ = self
            .bytes_in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

/// Shared handle to the scratch area. Cheap to clone.
#[derive(Clone)]
pub struct TempStore {
    inner: Arc<StoreInner>,
}

impl TempStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                bytes_in_use: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Bytes currently charged to live (non-terminal) artifacts.
    pub fn bytes_in_use(&self) -> u64 {
        self.inner.bytes_in_use.load(Ordering::Acquire)
    }

    /// Creates the scratch and public directories and removes job directories
    /// left behind by a previous process. Must run before any scope is opened.
    pub async fn init(&self) -> Result<usize, StoreError> {
        let scratch = &self.inner.config.scratch_dir;
        let public = &self.inner.config.public_dir;
        fs::create_dir_all(scratch)
            .await
            .map_err(|e| StoreError::from_io(e, scratch))?;
        fs::create_dir_all(public)
            .await
            .map_err(|e| StoreError::from_io(e, public))?;

        let mut swept = 0;
        let mut entries = fs::read_dir(scratch).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => swept += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale scratch entry"),
            }
        }

        if swept > 0 {
            info!(swept, scratch = %scratch.display(), "Removed stale scratch entries");
        }
        Ok(swept)
    }

    /// Opens the artifact namespace of one job. Touches no storage.
    pub fn open_scope(&self, request_id: &RequestId) -> JobScope {
        JobScope {
            store: Arc::clone(&self.inner),
            request_id: request_id.clone(),
            dir: self.inner.config.scratch_dir.join(request_id.as_str()),
            artifacts: Vec::new(),
            dir_created: false,
            closed: false,
        }
    }
}

/// The artifacts of exactly one job.
pub struct JobScope {
    store: Arc<StoreInner>,
    request_id: RequestId,
    dir: PathBuf,
    artifacts: Vec<TempArtifact>,
    dir_created: bool,
    closed: bool,
}

impl JobScope {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The job's private directory. May not exist yet.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifacts(&self) -> &[TempArtifact] {
        &self.artifacts
    }

    pub fn artifact(&self, id: ArtifactId) -> Result<&TempArtifact, StoreError> {
        self.artifacts
            .get(id.0)
            .ok_or(StoreError::UnknownArtifact(id.0))
    }

    /// Current backing path of an artifact.
    pub fn path(&self, id: ArtifactId) -> Result<&Path, StoreError> {
        self.artifact(id).map(|a| a.path.as_path())
    }

    fn artifact_mut(&mut self, id: ArtifactId) -> Result<&mut TempArtifact, StoreError> {
        self.artifacts
            .get_mut(id.0)
            .ok_or(StoreError::UnknownArtifact(id.0))
    }

    /// Reserves a unique, requestId-prefixed name. No file is created.
    pub fn allocate(&mut self, suffix: &str) -> Result<ArtifactId, StoreError> {
        let config = &self.store.config;
        if self.artifacts.len() >= config.max_artifacts_per_job {
            return Err(StoreError::QuotaExceeded {
                reason: format!(
                    "job reached the limit of {} artifacts",
                    config.max_artifacts_per_job
                ),
            });
        }
        let in_use = self.store.bytes_in_use.load(Ordering::Acquire);
        if in_use >= config.max_scratch_bytes {
            return Err(StoreError::QuotaExceeded {
                reason: format!("{} of {} bytes in use", in_use, config.max_scratch_bytes),
            });
        }

        let random = Uuid::new_v4().simple().to_string();
        let prefix = format!("{}-{}", self.request_id, &random[..12]);
        let suffix: String = suffix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let file_name = if suffix.is_empty() {
            prefix.clone()
        } else {
            format!("{}.{}", prefix, suffix)
        };

        let id = ArtifactId(self.artifacts.len());
        self.artifacts.push(TempArtifact {
            id,
            owner: self.request_id.clone(),
            path: self.dir.join(&file_name),
            prefix,
            state: ArtifactState::Allocated,
            charged_bytes: 0,
        });
        debug!(request_id = %self.request_id, artifact = id.0, file = %file_name, "Allocated artifact");
        Ok(id)
    }

    /// Creates the job directory if needed and returns its path. Backends
    /// that write their own output call this before spawning a tool.
    pub async fn prepare(&mut self) -> Result<PathBuf, StoreError> {
        if !self.dir_created {
            fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| StoreError::from_io(e, &self.dir))?;
            self.dir_created = true;
        }
        Ok(self.dir.clone())
    }

    /// Writes `data` as the artifact's content, charging the quota first.
    pub async fn write(&mut self, id: ArtifactId, data: &[u8]) -> Result<(), StoreError> {
        let artifact = self.artifact(id)?;
        expect_state(artifact, ArtifactState::Allocated, "allocated")?;
        let path = artifact.path.clone();
        let size = data.len() as u64;

        self.store.reserve(size)?;
        let written = match self.prepare().await {
            Ok(_) => fs::write(&path, data)
                .await
                .map_err(|e| StoreError::from_io(e, &path)),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.store.release(size);
            return Err(e);
        }

        let artifact = self.artifact_mut(id)?;
        artifact.charged_bytes = size;
        artifact.state = ArtifactState::Written;
        Ok(())
    }

    /// Points the artifact at a file a tool produced inside the job directory.
    /// The file name must carry the artifact's prefix.
    pub fn adopt(&mut self, id: ArtifactId, produced: &Path) -> Result<(), StoreError> {
        let dir = self.dir.clone();
        let artifact = self.artifact_mut(id)?;
        expect_state(artifact, ArtifactState::Allocated, "allocated")?;

        let in_dir = produced.parent() == Some(dir.as_path());
        let named = produced
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&artifact.prefix));
        if !in_dir || !named {
            return Err(StoreError::OutsideNamespace {
                path: produced.to_path_buf(),
            });
        }

        artifact.path = produced.to_path_buf();
        Ok(())
    }

    /// Records that a backend wrote the artifact's file. Fails when the file
    /// is missing or empty.
    pub async fn mark_written(&mut self, id: ArtifactId) -> Result<u64, StoreError> {
        let artifact = self.artifact(id)?;
        expect_state(artifact, ArtifactState::Allocated, "allocated")?;
        let path = artifact.path.clone();

        let size = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StoreError::Io(e)),
        };
        if size == 0 {
            return Err(StoreError::MissingOutput { path });
        }

        self.store.reserve(size)?;
        let artifact = self.artifact_mut(id)?;
        artifact.charged_bytes = size;
        artifact.state = ArtifactState::Written;
        Ok(size)
    }

    /// Moves a written artifact into the public directory. Ownership passes
    /// to the response layer; cleanup leaves the published file alone.
    pub async fn publish(&mut self, id: ArtifactId) -> Result<PublicRef, StoreError> {
        let artifact = self.artifact(id)?;
        expect_state(artifact, ArtifactState::Written, "written")?;
        let source = artifact.path.clone();
        let charged = artifact.charged_bytes;
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::OutsideNamespace {
                path: source.clone(),
            })?;

        let (size_bytes, sha256) = hash_file(&source).await?;

        let public_dir = self.store.config.public_dir.clone();
        fs::create_dir_all(&public_dir)
            .await
            .map_err(|e| StoreError::from_io(e, &public_dir))?;
        let destination = public_dir.join(&file_name);
        move_file(&source, &destination).await?;

        self.store.release(charged);
        let artifact = self.artifact_mut(id)?;
        artifact.state = ArtifactState::Published;
        artifact.charged_bytes = 0;
        artifact.path = destination.clone();

        info!(
            request_id = %self.request_id,
            file = %file_name,
            size_bytes,
            "Published artifact"
        );

        Ok(PublicRef {
            url: public_url(&self.store.config.public_base_url, &file_name),
            file_name,
            path: destination,
            size_bytes,
            sha256,
        })
    }

    /// Deletes the artifact's file. A no-op for terminal artifacts.
    pub async fn discard(&mut self, id: ArtifactId) -> Result<(), StoreError> {
        let artifact = self.artifact(id)?;
        if artifact.state.is_terminal() {
            return Ok(());
        }
        let path = artifact.path.clone();
        let charged = artifact.charged_bytes;

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }

        self.store.release(charged);
        let artifact = self.artifact_mut(id)?;
        artifact.state = ArtifactState::Discarded;
        artifact.charged_bytes = 0;
        debug!(request_id = %self.request_id, artifact = id.0, "Discarded artifact");
        Ok(())
    }

    /// Discards every non-published artifact and removes the job directory,
    /// including tool byproducts no artifact accounted for.
    pub async fn cleanup(mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut pending = Vec::new();

        let ids: Vec<ArtifactId> = self.artifacts.iter().map(|a| a.id).collect();
        for id in ids {
            if let Err(e) = self.discard(id).await {
                pending.push(format!("artifact #{}: {}", id.0, e));
            }
        }

        let dir_removed = match fs::read_dir(&self.dir).await {
            Ok(mut entries) => {
                while let Ok(Some(_)) = entries.next_entry().await {
                    report.stray_files += 1;
                }
                match fs::remove_dir_all(&self.dir).await {
                    Ok(()) => true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                    Err(e) => {
                        report
                            .errors
                            .push(format!("{}: {}", self.dir.display(), e));
                        false
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                report
                    .errors
                    .push(format!("{}: {}", self.dir.display(), e));
                false
            }
        };

        if dir_removed {
            // Files that failed individual removal went with the directory.
            for artifact in self.artifacts.iter_mut() {
                if !artifact.state.is_terminal() {
                    self.store.release(artifact.charged_bytes);
                    artifact.charged_bytes = 0;
                    artifact.state = ArtifactState::Discarded;
                }
            }
        } else {
            report.errors.extend(pending);
        }

        for artifact in &self.artifacts {
            match artifact.state {
                ArtifactState::Published => report.published += 1,
                ArtifactState::Discarded => report.discarded += 1,
                _ => {}
            }
        }

        self.closed = true;
        if report.is_clean() {
            debug!(
                request_id = %self.request_id,
                discarded = report.discarded,
                published = report.published,
                stray_files = report.stray_files,
                "Job scope cleaned up"
            );
        } else {
            warn!(request_id = %self.request_id, errors = ?report.errors, "Job scope cleanup incomplete");
        }
        report
    }
}

impl Drop for JobScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        for artifact in self.artifacts.iter_mut() {
            if !artifact.state.is_terminal() {
                self.store.release(artifact.charged_bytes);
                artifact.charged_bytes = 0;
                artifact.state = ArtifactState::Discarded;
            }
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => warn!(
                request_id = %self.request_id,
                "Job scope dropped without cleanup, removed its directory"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                request_id = %self.request_id,
                error = %e,
                "Failed to remove directory of dropped job scope"
            ),
        }
    }
}

fn expect_state(
    artifact: &TempArtifact,
    expected: ArtifactState,
    label: &'static str,
) -> Result<(), StoreError> {
    if artifact.state == expected {
        Ok(())
    } else {
        Err(StoreError::InvalidState {
            id: artifact.id.0,
            state: artifact.state,
            expected: label,
        })
    }
}

fn public_url(base: &str, file_name: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        urlencoding::encode(file_name)
    )
}

/// Renames, falling back to copy and remove across filesystems.
async fn move_file(source: &Path, destination: &Path) -> Result<(), StoreError> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        // EXDEV is 18 on Linux
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) => {
            if let Err(e) = fs::copy(source, destination).await {
                let _ = fs::remove_file(destination).await;
                return Err(publish_error(e, source, destination));
            }
            if let Err(e) = fs::remove_file(source).await {
                warn!(path = %source.display(), error = %e, "Failed to remove source after copy");
            }
            Ok(())
        }
        Err(e) => Err(publish_error(e, source, destination)),
    }
}

/// Out-of-space during a publish is exhaustion, anything else a publish failure.
fn publish_error(error: std::io::Error, source: &Path, destination: &Path) -> StoreError {
    if is_out_of_space(&error) {
        StoreError::StorageFull {
            path: destination.to_path_buf(),
        }
    } else {
        StoreError::PublishFailed {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
            error,
        }
    }
}

async fn hash_file(path: &Path) -> Result<(u64, String), StoreError> {
    let file = File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::MissingOutput {
                path: path.to_path_buf(),
            }
        } else {
            StoreError::Io(e)
        }
    })?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((total, format!("{:x}", hasher.finalize())))
}
