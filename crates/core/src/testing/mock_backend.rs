//! Scriptable backend for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::backend::{
    locate_output, Backend, BackendError, BackendOutcome, Invocation, ProducedFile,
};
use crate::job::JobKind;

/// What a [`MockBackend`] does when invoked.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return an inline payload.
    Inline(serde_json::Value),
    /// Write bytes to the allocated output path.
    WriteOutput(Vec<u8>),
    /// Write bytes under a tool-chosen extension and locate the result by prefix.
    WriteNamed { extension: String, data: Vec<u8> },
    /// Write `n` files sharing the output prefix, then locate by prefix.
    WriteMany(usize),
    /// Write part of the output, then exit with an error.
    WritePartialThenFail(String),
    /// Exit nonzero with the given stderr.
    NonZeroExit(String),
    /// Report a file that was never written.
    NoOutput,
    /// Sleep until cancelled or dropped.
    Hang,
}

/// Backend with scripted behavior and call instrumentation.
///
/// ```rust,ignore
/// let backend = MockBackend::new(JobKind::ZipPack, MockBehavior::WriteOutput(b"PK".to_vec()))
///     .with_delay(Duration::from_millis(50));
/// invoker.register(Arc::new(backend.clone()));
/// // ... run jobs ...
/// assert!(backend.max_concurrent() <= 2);
/// ```
#[derive(Debug, Clone)]
pub struct MockBackend {
    kind: JobKind,
    behavior: Arc<RwLock<MockBehavior>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    invocations: Arc<RwLock<Vec<Invocation>>>,
}

impl MockBackend {
    pub fn new(kind: JobKind, behavior: MockBehavior) -> Self {
        Self {
            kind,
            behavior: Arc::new(RwLock::new(behavior)),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            invocations: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Sleep this long before acting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous invocations observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.read().await.clone()
    }

    async fn act(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        let behavior = self.behavior.read().await.clone();
        let produced = |path| {
            BackendOutcome::File(ProducedFile {
                path,
                content_type: "application/octet-stream".to_string(),
                download_name: "output.bin".to_string(),
            })
        };

        match behavior {
            MockBehavior::Inline(payload) => Ok(BackendOutcome::Inline(payload)),
            MockBehavior::WriteOutput(data) => {
                tokio::fs::write(&invocation.output, data).await?;
                Ok(produced(invocation.output.clone()))
            }
            MockBehavior::WriteNamed { extension, data } => {
                let path = invocation
                    .work_dir
                    .join(format!("{}.{}", invocation.output_prefix, extension));
                tokio::fs::write(&path, data).await?;
                let found =
                    locate_output(&invocation.work_dir, &invocation.output_prefix, None).await?;
                Ok(produced(found))
            }
            MockBehavior::WriteMany(n) => {
                for i in 0..n {
                    let path = invocation
                        .work_dir
                        .join(format!("{}.part{}.bin", invocation.output_prefix, i));
                    tokio::fs::write(&path, b"chunk").await?;
                }
                let found =
                    locate_output(&invocation.work_dir, &invocation.output_prefix, None).await?;
                Ok(produced(found))
            }
            MockBehavior::WritePartialThenFail(stderr) => {
                tokio::fs::write(&invocation.output, b"partial").await?;
                Err(BackendError::NonZeroExit {
                    tool: "mock".to_string(),
                    code: Some(1),
                    stderr,
                })
            }
            MockBehavior::NonZeroExit(stderr) => Err(BackendError::NonZeroExit {
                tool: "mock".to_string(),
                code: Some(1),
                stderr,
            }),
            MockBehavior::NoOutput => Ok(produced(invocation.output.clone())),
            MockBehavior::Hang => loop {
                invocation.cancel.check()?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
        }
    }
}

/// Decrements the running count when an invocation ends or is dropped.
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(Arc::clone(&self.running));
        self.invocations.write().await.push(invocation.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.act(invocation).await
    }
}
