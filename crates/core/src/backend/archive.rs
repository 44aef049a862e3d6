//! Zip packaging of uploaded files.

use async_trait::async_trait;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    unexpected_params, Backend, BackendError, BackendOutcome, CancelFlag, Invocation,
    ProducedFile, StagedInput,
};
use crate::job::{JobKind, JobParams};

pub struct ZipBackend;

impl ZipBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ZipBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ZipBackend {
    fn name(&self) -> &str {
        "zip"
    }

    fn kind(&self) -> JobKind {
        JobKind::ZipPack
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        let JobParams::ZipPack { archive_name } = &invocation.params else {
            return Err(unexpected_params(self.name(), &invocation.params));
        };
        if invocation.inputs.is_empty() {
            return Err(BackendError::failed("nothing to pack"));
        }

        let inputs = invocation.inputs.clone();
        let output = invocation.output.clone();
        invocation
            .cancel
            .run_blocking(move |cancel| pack(&inputs, &output, cancel))
            .await?;

        Ok(BackendOutcome::File(ProducedFile {
            path: invocation.output.clone(),
            content_type: "application/zip".to_string(),
            download_name: format!("{}.zip", archive_name),
        }))
    }
}

fn pack(inputs: &[StagedInput], output: &Path, cancel: &CancelFlag) -> Result<(), BackendError> {
    let zip_error = |e: ZipError| match e {
        ZipError::Io(e) => BackendError::Io(e),
        other => BackendError::failed(format!("zip: {}", other)),
    };
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(BufWriter::new(File::create(output)?));
    for input in inputs {
        cancel.check()?;
        writer
            .start_file(input.name.as_str(), options)
            .map_err(zip_error)?;
        let mut reader = BufReader::new(File::open(&input.path)?);
        std::io::copy(&mut reader, &mut writer)?;
    }
    writer.finish().map_err(zip_error)?;
    Ok(())
}
