//! Dispatch from job kind to backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{
    AudioBackend, Backend, BackendError, BackendOutcome, DocumentBackend, DownloadBackend,
    ImageBackend, Invocation, ProcessRunner, ToolRegistry, TtsBackend, ZipBackend,
};
use crate::config::Config;
use crate::job::JobKind;

/// Uniform entry point over every registered backend.
pub struct BackendInvoker {
    backends: HashMap<JobKind, Arc<dyn Backend>>,
    tools: Arc<ToolRegistry>,
}

impl BackendInvoker {
    /// An invoker with no backends registered.
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            backends: HashMap::new(),
            tools,
        }
    }

    /// Discovers tools and registers the built-in backend for every kind.
    pub fn from_config(config: &Config) -> Self {
        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        Self::with_default_backends(tools, config)
    }

    pub fn with_default_backends(tools: Arc<ToolRegistry>, config: &Config) -> Self {
        let runner = ProcessRunner::new(config.limits.max_tool_output_bytes);
        let mut invoker = Self::new(Arc::clone(&tools));
        invoker
            .register(Arc::new(TtsBackend::new(config.tts.host.clone())))
            .register(Arc::new(ImageBackend::new()))
            .register(Arc::new(ZipBackend::new()))
            .register(Arc::new(DocumentBackend::new(
                Arc::clone(&tools),
                runner.clone(),
            )))
            .register(Arc::new(AudioBackend::new(
                Arc::clone(&tools),
                runner.clone(),
            )))
            .register(Arc::new(DownloadBackend::new(
                tools,
                runner,
                config.limits.max_upload_bytes,
            )));
        invoker
    }

    /// Registers `backend` for its kind, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> &mut Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Whether a job of this kind could run right now.
    pub fn is_available(&self, kind: JobKind) -> bool {
        self.backends.get(&kind).is_some_and(|backend| {
            backend
                .required_tool()
                .is_none_or(|tool| self.tools.is_available(tool))
        })
    }

    pub async fn invoke(
        &self,
        kind: JobKind,
        invocation: &Invocation,
    ) -> Result<BackendOutcome, BackendError> {
        let backend = self
            .backends
            .get(&kind)
            .ok_or(BackendError::NotRegistered(kind))?;
        if let Some(tool) = backend.required_tool() {
            self.tools.require(tool)?;
        }

        debug!(
            request_id = %invocation.request_id,
            kind = %kind,
            backend = backend.name(),
            budget = ?invocation.budget,
            "Invoking backend"
        );
        let started = Instant::now();
        let result = backend.invoke(invocation).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => info!(
                request_id = %invocation.request_id,
                backend = backend.name(),
                ?elapsed,
                "Backend finished"
            ),
            Err(e) => warn!(
                request_id = %invocation.request_id,
                backend = backend.name(),
                ?elapsed,
                error = %e,
                "Backend failed"
            ),
        }
        result
    }
}

/// Finds the single file in `dir` whose name starts with `prefix`, for tools
/// that choose their own output names. Partial downloads are ignored.
pub async fn locate_output(
    dir: &Path,
    prefix: &str,
    extension: Option<&str>,
) -> Result<PathBuf, BackendError> {
    let ambiguous = |found| BackendError::AmbiguousOutput {
        prefix: prefix.to_string(),
        found,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ambiguous(0)),
        Err(e) => return Err(e.into()),
    };

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !entry.file_type().await?.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if matches!(ext.as_deref(), Some("part") | Some("ytdl") | Some("temp")) {
            continue;
        }
        if let Some(wanted) = extension {
            if ext.as_deref() != Some(wanted) {
                continue;
            }
        }
        candidates.push(path);
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        found => Err(ambiguous(found)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CancelFlag, Tool};
    use crate::config::load_config_from_str;
    use crate::job::{JobParams, RequestId};
    use std::time::Duration;

    fn config() -> Config {
        load_config_from_str("[auth]\nmethod = \"none\"\n").unwrap()
    }

    #[test]
    fn test_default_backends_availability() {
        let tools = Arc::new(ToolRegistry::empty().with_tool(Tool::Ffmpeg, "/usr/bin/ffmpeg"));
        let invoker = BackendInvoker::with_default_backends(tools, &config());
        assert!(invoker.is_available(JobKind::TextToSpeech));
        assert!(invoker.is_available(JobKind::ImageConvert));
        assert!(invoker.is_available(JobKind::ZipPack));
        assert!(invoker.is_available(JobKind::VideoToAudio));
        assert!(!invoker.is_available(JobKind::DocumentToPdf));
        assert!(!invoker.is_available(JobKind::RemoteDownload));
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable_before_spawn() {
        let invoker =
            BackendInvoker::with_default_backends(Arc::new(ToolRegistry::empty()), &config());
        let invocation = Invocation {
            request_id: RequestId::new(),
            params: JobParams::RemoteDownload {
                url: "https://example.com/a".to_string(),
                mode: Default::default(),
            },
            inputs: Vec::new(),
            work_dir: PathBuf::from("/nonexistent"),
            output: PathBuf::from("/nonexistent/x"),
            output_prefix: "x".to_string(),
            budget: Duration::from_secs(1),
            cancel: CancelFlag::new(),
        };
        let err = invoker
            .invoke(JobKind::RemoteDownload, &invocation)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_unregistered_kind() {
        let invoker = BackendInvoker::new(Arc::new(ToolRegistry::empty()));
        assert!(!invoker.is_available(JobKind::ZipPack));
        let invocation = Invocation {
            request_id: RequestId::new(),
            params: JobParams::DocumentToPdf,
            inputs: Vec::new(),
            work_dir: PathBuf::from("/nonexistent"),
            output: PathBuf::from("/nonexistent/x.pdf"),
            output_prefix: "x".to_string(),
            budget: Duration::from_secs(1),
            cancel: CancelFlag::new(),
        };
        let err = invoker
            .invoke(JobKind::DocumentToPdf, &invocation)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotRegistered(JobKind::DocumentToPdf)));
    }

    #[tokio::test]
    async fn test_locate_output_single_match() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("req-1.webm"), b"v").unwrap();
        std::fs::write(tmp.path().join("req-1.webm.part"), b"p").unwrap();
        std::fs::write(tmp.path().join("req-1.ytdl"), b"m").unwrap();
        std::fs::write(tmp.path().join("other.mp4"), b"o").unwrap();

        let found = locate_output(tmp.path(), "req-1", None).await.unwrap();
        assert_eq!(found, tmp.path().join("req-1.webm"));
    }

    #[tokio::test]
    async fn test_locate_output_zero_or_many() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = locate_output(tmp.path(), "req-1", None).await.unwrap_err();
        assert!(matches!(err, BackendError::AmbiguousOutput { found: 0, .. }));

        std::fs::write(tmp.path().join("req-1.f137.mp4"), b"v").unwrap();
        std::fs::write(tmp.path().join("req-1.f140.m4a"), b"a").unwrap();
        let err = locate_output(tmp.path(), "req-1", None).await.unwrap_err();
        assert!(matches!(err, BackendError::AmbiguousOutput { found: 2, .. }));

        let found = locate_output(tmp.path(), "req-1", Some("m4a")).await.unwrap();
        assert!(found.ends_with("req-1.f140.m4a"));
    }
}
