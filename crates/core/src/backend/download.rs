//! Remote media download with yt-dlp.

use async_trait::async_trait;
use std::ffi::OsString;
use std::sync::Arc;

use super::invoker::locate_output;
use super::{
    unexpected_params, Backend, BackendError, BackendOutcome, Invocation, ProcessRunner,
    ProducedFile, Tool, ToolRegistry,
};
use crate::job::{content_type_for_extension, DownloadMode, JobKind, JobParams};

pub struct DownloadBackend {
    tools: Arc<ToolRegistry>,
    runner: ProcessRunner,
    max_filesize: u64,
}

impl DownloadBackend {
    pub fn new(tools: Arc<ToolRegistry>, runner: ProcessRunner, max_filesize: u64) -> Self {
        Self {
            tools,
            runner,
            max_filesize,
        }
    }

    fn build_args(&self, invocation: &Invocation, url: &str, mode: DownloadMode) -> Vec<OsString> {
        let template = invocation
            .work_dir
            .join(format!("{}.%(ext)s", invocation.output_prefix));

        let mut args: Vec<OsString> = vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--no-mtime".into(),
            "--max-filesize".into(),
            self.max_filesize.to_string().into(),
            "-o".into(),
            template.into_os_string(),
        ];
        if mode == DownloadMode::Audio {
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push("mp3".into());
        }
        // The URL can never be read as an option.
        args.push("--".into());
        args.push(url.into());
        args
    }
}

#[async_trait]
impl Backend for DownloadBackend {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn kind(&self) -> JobKind {
        JobKind::RemoteDownload
    }

    fn required_tool(&self) -> Option<Tool> {
        Some(Tool::YtDlp)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        let JobParams::RemoteDownload { url, mode } = &invocation.params else {
            return Err(unexpected_params(self.name(), &invocation.params));
        };
        let program = self.tools.require(Tool::YtDlp)?;
        let args = self.build_args(invocation, url, *mode);

        self.runner
            .run(Tool::YtDlp, program, &args, invocation.budget)
            .await?;

        // yt-dlp picks the extension from the remote media.
        let produced = locate_output(&invocation.work_dir, &invocation.output_prefix, None).await?;
        let ext = produced
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_ascii_lowercase();

        Ok(BackendOutcome::File(ProducedFile {
            path: produced,
            content_type: content_type_for_extension(&ext).to_string(),
            download_name: format!("download.{}", ext),
        }))
    }
}
