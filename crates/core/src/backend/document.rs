//! Document (and image) to PDF through headless LibreOffice.

use async_trait::async_trait;
use std::ffi::OsString;
use std::sync::Arc;
use tracing::debug;

use super::invoker::locate_output;
use super::{
    first_input, unexpected_params, Backend, BackendError, BackendOutcome, Invocation,
    ProcessRunner, ProducedFile, Tool, ToolRegistry,
};
use crate::job::{JobKind, JobParams};

pub struct DocumentBackend {
    tools: Arc<ToolRegistry>,
    runner: ProcessRunner,
}

impl DocumentBackend {
    pub fn new(tools: Arc<ToolRegistry>, runner: ProcessRunner) -> Self {
        Self { tools, runner }
    }

    fn build_args(invocation: &Invocation, input: &std::path::Path) -> Vec<OsString> {
        // A private profile per job keeps concurrent soffice instances apart.
        let work_dir =
            std::path::absolute(&invocation.work_dir).unwrap_or_else(|_| invocation.work_dir.clone());
        let profile = format!(
            "-env:UserInstallation=file://{}",
            work_dir.join("lo-profile").display()
        );

        let mut args: Vec<OsString> = vec![
            "--headless".into(),
            "--norestore".into(),
            "--nolockcheck".into(),
            profile.into(),
            "--convert-to".into(),
            "pdf".into(),
            "--outdir".into(),
        ];
        args.push(invocation.work_dir.clone().into_os_string());
        args.push(input.as_os_str().to_os_string());
        args
    }
}

#[async_trait]
impl Backend for DocumentBackend {
    fn name(&self) -> &str {
        "libreoffice"
    }

    fn kind(&self) -> JobKind {
        JobKind::DocumentToPdf
    }

    fn required_tool(&self) -> Option<Tool> {
        Some(Tool::Soffice)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        if !matches!(invocation.params, JobParams::DocumentToPdf) {
            return Err(unexpected_params(self.name(), &invocation.params));
        }
        let program = self.tools.require(Tool::Soffice)?;
        let input = first_input(invocation)?;
        let args = Self::build_args(invocation, &input.path);

        self.runner
            .run(Tool::Soffice, program, &args, invocation.budget)
            .await?;

        // soffice names the PDF after the input file's stem.
        let input_stem = input
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| BackendError::failed("input path has no file stem"))?;
        let produced = locate_output(&invocation.work_dir, input_stem, Some("pdf")).await?;
        debug!(from = %produced.display(), to = %invocation.output.display(), "Renaming soffice output");
        tokio::fs::rename(&produced, &invocation.output).await?;

        Ok(BackendOutcome::File(ProducedFile {
            path: invocation.output.clone(),
            content_type: "application/pdf".to_string(),
            download_name: format!("{}.pdf", input.stem()),
        }))
    }
}
