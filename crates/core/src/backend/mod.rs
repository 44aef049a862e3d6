//! Conversion backends and the invoker that dispatches to them.
//!
//! A [`Backend`] performs one [`JobKind`]. In-process backends (TTS, image,
//! zip) run library code, on a blocking thread where the work is CPU-bound.
//! Out-of-process backends (document, audio, download) spawn an allow-listed
//! tool through the [`ProcessRunner`].

mod archive;
mod audio;
mod document;
mod download;
mod error;
mod image_convert;
mod invoker;
mod process;
mod tools;
mod tts;

pub use archive::ZipBackend;
pub use audio::AudioBackend;
pub use document::DocumentBackend;
pub use download::DownloadBackend;
pub use error::BackendError;
pub use image_convert::ImageBackend;
pub use invoker::{locate_output, BackendInvoker};
pub use process::{summarize_stderr, ProcessOutput, ProcessRunner};
pub use tools::{Tool, ToolInfo, ToolRegistry};
pub use tts::TtsBackend;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::job::{JobKind, JobParams, RequestId};

/// Cooperative cancellation signal for in-process backends.
///
/// Also tracks the blocking workers started through [`CancelFlag::run_blocking`],
/// which keep running after their awaiting future is dropped.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    workers: AtomicUsize,
    idle: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Safe-point check.
    pub fn check(&self) -> Result<(), BackendError> {
        if self.is_cancelled() {
            Err(BackendError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs `work` on the blocking pool. The worker counts as running until
    /// `work` returns, whether or not anyone still awaits it.
    pub async fn run_blocking<T, F>(&self, work: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelFlag) -> Result<T, BackendError> + Send + 'static,
    {
        let guard = WorkerGuard::enter(self.clone());
        tokio::task::spawn_blocking(move || {
            let guard = guard;
            work(&guard.0)
        })
            .await
            .map_err(|e| BackendError::failed(format!("blocking worker failed: {}", e)))?
    }

    /// Number of blocking workers still running.
    pub fn running_workers(&self) -> usize {
        self.0.workers.load(Ordering::Acquire)
    }

    /// Resolves once every blocking worker has returned.
    pub async fn settled(&self) {
        loop {
            let idle = self.0.idle.notified();
            if self.running_workers() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Counts one blocking worker for as long as it lives.
struct WorkerGuard(CancelFlag);

impl WorkerGuard {
    fn enter(flag: CancelFlag) -> Self {
        flag.0.workers.fetch_add(1, Ordering::AcqRel);
        Self(flag)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let state = &(self.0).0;
        if state.workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.idle.notify_waiters();
        }
    }
}

/// An input file staged in the job directory.
#[derive(Debug, Clone)]
pub struct StagedInput {
    pub path: PathBuf,
    /// Sanitized name the caller uploaded it under.
    pub name: String,
}

impl StagedInput {
    /// Uploaded name without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("file")
    }
}

/// One backend call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: RequestId,
    pub params: JobParams,
    pub inputs: Vec<StagedInput>,
    /// Job directory; exists when the backend is called.
    pub work_dir: PathBuf,
    /// Where the primary output should be written.
    pub output: PathBuf,
    /// Prefix every file the backend produces must start with.
    pub output_prefix: String,
    pub budget: Duration,
    pub cancel: CancelFlag,
}

/// A file the backend produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedFile {
    pub path: PathBuf,
    pub content_type: String,
    /// Suggested name for the download.
    pub download_name: String,
}

/// What a backend returned.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    Inline(serde_json::Value),
    File(ProducedFile),
}

/// A conversion backend for one job kind.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> JobKind;

    /// External tool the backend spawns, if any.
    fn required_tool(&self) -> Option<Tool> {
        None
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError>;
}

/// Error for a backend handed parameters of another kind.
pub(crate) fn unexpected_params(backend: &str, params: &JobParams) -> BackendError {
    BackendError::failed(format!(
        "{} cannot handle {} parameters",
        backend,
        params.kind()
    ))
}

/// First staged input or an error.
pub(crate) fn first_input(invocation: &Invocation) -> Result<&StagedInput, BackendError> {
    invocation
        .inputs
        .first()
        .ok_or_else(|| BackendError::failed("no input file was staged"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(flag.check().is_ok());
        clone.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(BackendError::Cancelled)));
    }

    #[tokio::test]
    async fn test_settled_waits_for_abandoned_worker() {
        let flag = CancelFlag::new();
        let worker = flag.clone();
        let handle = tokio::spawn(async move {
            worker
                .run_blocking(|cancel| {
                    while !cancel.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                    cancel.check()
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(flag.running_workers(), 1);

        // dropping the awaiting future does not stop the worker
        handle.abort();
        let _ = handle.await;
        assert_eq!(flag.running_workers(), 1);

        flag.cancel();
        tokio::time::timeout(Duration::from_secs(5), flag.settled())
            .await
            .unwrap();
        assert_eq!(flag.running_workers(), 0);
    }

    #[tokio::test]
    async fn test_settled_without_workers_is_immediate() {
        CancelFlag::new().settled().await;
    }

    #[test]
    fn test_staged_input_stem() {
        let input = StagedInput {
            path: PathBuf::from("/scratch/a/a-1.docx"),
            name: "Quarterly Report.docx".to_string(),
        };
        assert_eq!(input.stem(), "Quarterly Report");
        let input = StagedInput {
            path: PathBuf::from("/x"),
            name: String::new(),
        };
        assert_eq!(input.stem(), "file");
    }
}
