//! Job model: kinds, request identifiers, inputs and parameters.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use super::formats::{AudioTarget, DownloadMode, ImageTarget};

/// The conversion operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    TextToSpeech,
    ImageConvert,
    DocumentToPdf,
    ZipPack,
    VideoToAudio,
    RemoteDownload,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::TextToSpeech,
        JobKind::ImageConvert,
        JobKind::DocumentToPdf,
        JobKind::ZipPack,
        JobKind::VideoToAudio,
        JobKind::RemoteDownload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::TextToSpeech => "text_to_speech",
            JobKind::ImageConvert => "image_convert",
            JobKind::DocumentToPdf => "document_to_pdf",
            JobKind::ZipPack => "zip_pack",
            JobKind::VideoToAudio => "video_to_audio",
            JobKind::RemoteDownload => "remote_download",
        }
    }

    /// Whether the job yields a file (as opposed to an inline payload).
    pub fn produces_artifact(&self) -> bool {
        !matches!(self, JobKind::TextToSpeech)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-unique job identifier. Scopes every temp artifact of the job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RequestId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A job input: an uploaded buffer or a remote URL.
#[derive(Debug, Clone, PartialEq)]
pub enum InputRef {
    Buffer { name: String, data: Bytes },
    Url(String),
}

impl InputRef {
    pub fn buffer(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Buffer {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Declared size in bytes. URLs report zero.
    pub fn size(&self) -> u64 {
        match self {
            InputRef::Buffer { data, .. } => data.len() as u64,
            InputRef::Url(_) => 0,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InputRef::Buffer { name, .. } => name,
            InputRef::Url(url) => url,
        }
    }

    /// Lowercased file extension of a buffer's declared name.
    pub fn extension(&self) -> Option<String> {
        match self {
            InputRef::Buffer { name, .. } => Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| !e.is_empty())
                .map(|e| e.to_ascii_lowercase()),
            InputRef::Url(_) => None,
        }
    }
}

/// Normalized, kind-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    TextToSpeech {
        text: String,
        lang: String,
        slow: bool,
    },
    ImageConvert {
        format: ImageTarget,
        max_width: Option<u32>,
        max_height: Option<u32>,
    },
    DocumentToPdf,
    ZipPack {
        archive_name: String,
    },
    VideoToAudio {
        format: AudioTarget,
        bitrate_kbps: Option<u32>,
    },
    RemoteDownload {
        url: String,
        mode: DownloadMode,
    },
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::TextToSpeech { .. } => JobKind::TextToSpeech,
            JobParams::ImageConvert { .. } => JobKind::ImageConvert,
            JobParams::DocumentToPdf => JobKind::DocumentToPdf,
            JobParams::ZipPack { .. } => JobKind::ZipPack,
            JobParams::VideoToAudio { .. } => JobKind::VideoToAudio,
            JobParams::RemoteDownload { .. } => JobKind::RemoteDownload,
        }
    }

    /// Suffix for the output artifact allocated before invocation. Empty when
    /// the backend decides the extension itself.
    pub fn output_suffix(&self) -> &'static str {
        match self {
            JobParams::TextToSpeech { .. } => "",
            JobParams::ImageConvert { format, .. } => format.extension(),
            JobParams::DocumentToPdf => "pdf",
            JobParams::ZipPack { .. } => "zip",
            JobParams::VideoToAudio { format, .. } => format.extension(),
            JobParams::RemoteDownload { .. } => "",
        }
    }
}

/// A validated conversion job. Holds no resources of its own.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    kind: JobKind,
    inputs: Vec<InputRef>,
    params: JobParams,
    request_id: RequestId,
}

impl JobDescriptor {
    pub(crate) fn new(request_id: RequestId, inputs: Vec<InputRef>, params: JobParams) -> Self {
        Self {
            kind: params.kind(),
            inputs,
            params,
            request_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn inputs(&self) -> &[InputRef] {
        &self.inputs
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

/// An uploaded file as received by the HTTP layer.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Raw, unvalidated conversion request.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub kind: JobKind,
    pub text: Option<String>,
    pub url: Option<String>,
    pub files: Vec<UploadedFile>,
    /// Optional parameters (`lang`, `format`, `width`, `mode`, ...).
    pub options: HashMap<String, String>,
}

impl ConversionRequest {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            text: None,
            url: None,
            files: Vec::new(),
            options: HashMap::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.files.push(UploadedFile::new(name, data));
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Non-empty option value, trimmed.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_input_ref_extension() {
        let input = InputRef::buffer("Holiday.Photo.JPG", vec![1u8, 2, 3]);
        assert_eq!(input.extension().as_deref(), Some("jpg"));
        assert_eq!(input.size(), 3);

        assert_eq!(InputRef::buffer("README", vec![0u8]).extension(), None);
        assert_eq!(InputRef::Url("https://a.b/c.mp4".into()).extension(), None);
    }

    #[test]
    fn test_params_output_suffix() {
        let params = JobParams::ImageConvert {
            format: ImageTarget::Jpeg,
            max_width: None,
            max_height: None,
        };
        assert_eq!(params.kind(), JobKind::ImageConvert);
        assert_eq!(params.output_suffix(), "jpg");
        assert_eq!(JobParams::DocumentToPdf.output_suffix(), "pdf");
    }

    #[test]
    fn test_request_option_trims_blank() {
        let request = ConversionRequest::new(JobKind::ImageConvert)
            .with_option("format", "  ")
            .with_option("width", " 100 ");
        assert_eq!(request.option("format"), None);
        assert_eq!(request.option("width"), Some("100"));
    }

    #[test]
    fn test_job_kind_serde() {
        assert_eq!(
            serde_json::to_value(JobKind::VideoToAudio).unwrap(),
            serde_json::json!("video_to_audio")
        );
        assert!(JobKind::ZipPack.produces_artifact());
        assert!(!JobKind::TextToSpeech.produces_artifact());
    }
}
