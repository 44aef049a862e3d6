//! Audio extraction from video with ffmpeg.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use super::{
    first_input, unexpected_params, Backend, BackendError, BackendOutcome, Invocation,
    ProcessRunner, ProducedFile, Tool, ToolRegistry,
};
use crate::job::{AudioTarget, JobKind, JobParams};

pub struct AudioBackend {
    tools: Arc<ToolRegistry>,
    runner: ProcessRunner,
}

impl AudioBackend {
    pub fn new(tools: Arc<ToolRegistry>, runner: ProcessRunner) -> Self {
        Self { tools, runner }
    }

    fn build_args(
        input: &Path,
        output: &Path,
        format: AudioTarget,
        bitrate_kbps: Option<u32>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_os_string(),
            "-vn".into(),
            "-c:a".into(),
            format.ffmpeg_codec().into(),
        ];
        if let Some(kbps) = bitrate_kbps.filter(|_| !format.is_lossless()) {
            args.push("-b:a".into());
            args.push(format!("{}k", kbps).into());
        }
        args.push(output.as_os_str().to_os_string());
        args
    }
}

#[async_trait]
impl Backend for AudioBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn kind(&self) -> JobKind {
        JobKind::VideoToAudio
    }

    fn required_tool(&self) -> Option<Tool> {
        Some(Tool::Ffmpeg)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        let JobParams::VideoToAudio {
            format,
            bitrate_kbps,
        } = invocation.params
        else {
            return Err(unexpected_params(self.name(), &invocation.params));
        };
        let program = self.tools.require(Tool::Ffmpeg)?;
        let input = first_input(invocation)?;
        let args = Self::build_args(&input.path, &invocation.output, format, bitrate_kbps);

        self.runner
            .run(Tool::Ffmpeg, program, &args, invocation.budget)
            .await?;

        Ok(BackendOutcome::File(ProducedFile {
            path: invocation.output.clone(),
            content_type: format.content_type().to_string(),
            download_name: format!("{}.{}", input.stem(), format.extension()),
        }))
    }
}
