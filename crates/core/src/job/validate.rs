//! Request validation.
//!
//! Turns a raw [`ConversionRequest`] into a [`JobDescriptor`] or an
//! `InvalidInput` failure. Pure parsing: nothing here touches the
//! filesystem, so a rejected request never allocates an artifact.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::HashSet;

use crate::config::LimitsConfig;
use crate::failure::Failure;

use super::formats::{AudioTarget, DownloadMode, ImageTarget};
use super::types::{ConversionRequest, InputRef, JobDescriptor, JobKind, JobParams, RequestId};

const DEFAULT_LANG: &str = "en";
const DEFAULT_ARCHIVE_NAME: &str = "archive";
const MAX_IMAGE_DIMENSION: u32 = 16_384;
const MAX_URL_LEN: usize = 2048;

static LANG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{2,3}([-_][A-Za-z0-9]{2,8})*$").unwrap());

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[A-Za-z0-9\[][^\s]*$").unwrap());

/// Document types LibreOffice can turn into PDF.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "doc", "docx", "odt", "rtf", "txt", "html", "htm", "ppt", "pptx", "odp", "xls", "xlsx", "ods",
    "csv", "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "svg",
];

/// Validates raw requests against the configured limits.
#[derive(Debug, Clone)]
pub struct JobValidator {
    limits: LimitsConfig,
}

impl JobValidator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Parses and validates a request into an immutable job descriptor.
    pub fn validate(
        &self,
        request_id: RequestId,
        request: ConversionRequest,
    ) -> Result<JobDescriptor, Failure> {
        let params = match request.kind {
            JobKind::TextToSpeech => self.text_to_speech_params(&request)?,
            JobKind::ImageConvert => self.image_params(&request)?,
            JobKind::DocumentToPdf => self.document_params(&request)?,
            JobKind::ZipPack => self.zip_params(&request)?,
            JobKind::VideoToAudio => self.audio_params(&request)?,
            JobKind::RemoteDownload => self.download_params(&request)?,
        };

        let inputs = match &params {
            JobParams::TextToSpeech { .. } => Vec::new(),
            JobParams::RemoteDownload { url, .. } => vec![InputRef::Url(url.clone())],
            _ => self.file_inputs(request)?,
        };

        Ok(JobDescriptor::new(request_id, inputs, params))
    }

    fn text_to_speech_params(&self, request: &ConversionRequest) -> Result<JobParams, Failure> {
        let text = request
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Failure::invalid_input("Text is required"))?;

        let chars = text.chars().count();
        if chars > self.limits.max_text_chars {
            return Err(Failure::invalid_input(format!(
                "Text is {} characters long, the limit is {}",
                chars, self.limits.max_text_chars
            )));
        }

        let lang = request.option("lang").unwrap_or(DEFAULT_LANG);
        if !LANG_RE.is_match(lang) {
            return Err(Failure::invalid_input(format!(
                "Unsupported language code: {}",
                lang
            )));
        }

        let slow = match request.option("slow") {
            Some(v) => parse_bool(v)
                .ok_or_else(|| Failure::invalid_input("slow must be true or false"))?,
            None => false,
        };

        Ok(JobParams::TextToSpeech {
            text: text.to_string(),
            lang: lang.to_string(),
            slow,
        })
    }

    fn image_params(&self, request: &ConversionRequest) -> Result<JobParams, Failure> {
        self.require_single_file(request, "No image uploaded")?;

        let format = match request.option("format") {
            Some(f) => ImageTarget::parse(f).ok_or_else(|| {
                Failure::invalid_input(format!("Unsupported image format: {}", f))
            })?,
            None => ImageTarget::Png,
        };

        Ok(JobParams::ImageConvert {
            format,
            max_width: parse_dimension(request.option("width"), "width")?,
            max_height: parse_dimension(request.option("height"), "height")?,
        })
    }

    fn document_params(&self, request: &ConversionRequest) -> Result<JobParams, Failure> {
        self.require_single_file(request, "No document uploaded")?;

        let ext = std::path::Path::new(&request.files[0].name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| Failure::invalid_input("Document has no file extension"))?;
        if !DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Failure::invalid_input(format!(
                "Unsupported document type: .{}",
                ext
            )));
        }

        Ok(JobParams::DocumentToPdf)
    }

    fn zip_params(&self, request: &ConversionRequest) -> Result<JobParams, Failure> {
        if request.files.is_empty() {
            return Err(Failure::invalid_input("No files uploaded"));
        }

        let archive_name = request
            .option("name")
            .map(|n| sanitize_file_stem(n.trim_end_matches(".zip")))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string());

        Ok(JobParams::ZipPack { archive_name })
    }

    fn audio_params(&self, request: &ConversionRequest) -> Result<JobParams, Failure> {
        self.require_single_file(request, "No video uploaded")?;

        let format = match request.option("format") {
            Some(f) => AudioTarget::parse(f).ok_or_else(|| {
                Failure::invalid_input(format!("Unsupported audio format: {}", f))
            })?,
            None => AudioTarget::Mp3,
        };

        let bitrate_kbps = match request.option("bitrate") {
            Some(b) => {
                let kbps = b
                    .trim_end_matches('k')
                    .parse::<u32>()
                    .ok()
                    .filter(|k| (32..=512).contains(k))
                    .ok_or_else(|| {
                        Failure::invalid_input("bitrate must be between 32 and 512 kbps")
                    })?;
                Some(kbps)
            }
            None => None,
        };

        Ok(JobParams::VideoToAudio {
            format,
            bitrate_kbps,
        })
    }

    fn download_params(&self, request: &ConversionRequest) -> Result<JobParams, Failure> {
        let url = request
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Failure::invalid_input("URL is required"))?;

        if url.len() > MAX_URL_LEN || !URL_RE.is_match(url) {
            return Err(Failure::invalid_input("URL must be an http(s) address"));
        }

        let mode = match request.option("mode") {
            Some(m) => DownloadMode::parse(m)
                .ok_or_else(|| Failure::invalid_input("mode must be video or audio"))?,
            None => DownloadMode::Video,
        };

        Ok(JobParams::RemoteDownload {
            url: url.to_string(),
            mode,
        })
    }

    fn require_single_file(&self, request: &ConversionRequest, missing: &str) -> Result<(), Failure> {
        match request.files.len() {
            0 => Err(Failure::invalid_input(missing)),
            1 => Ok(()),
            n => Err(Failure::invalid_input(format!(
                "Expected a single file, got {}",
                n
            ))),
        }
    }

    /// Enforces count and size ceilings, then converts uploads into inputs.
    fn file_inputs(&self, request: ConversionRequest) -> Result<Vec<InputRef>, Failure> {
        if request.files.len() > self.limits.max_files {
            return Err(Failure::invalid_input(format!(
                "Too many files: {} (limit {})",
                request.files.len(),
                self.limits.max_files
            )));
        }

        let mut seen = HashSet::new();
        let mut inputs = Vec::with_capacity(request.files.len());
        for file in request.files {
            let size = file.data.len() as u64;
            if size == 0 {
                return Err(Failure::invalid_input(format!(
                    "Uploaded file is empty: {}",
                    file.name
                )));
            }
            if size > self.limits.max_upload_bytes {
                return Err(Failure::invalid_input(format!(
                    "File {} is {} bytes, the limit is {}",
                    file.name, size, self.limits.max_upload_bytes
                )));
            }

            let name = unique_name(&mut seen, &sanitize_file_name(&file.name));
            inputs.push(InputRef::Buffer {
                name,
                data: file.data,
            });
        }
        Ok(inputs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_dimension(value: Option<&str>, field: &str) -> Result<Option<u32>, Failure> {
    match value {
        None => Ok(None),
        Some(v) => v
            .parse::<u32>()
            .ok()
            .filter(|d| (1..=MAX_IMAGE_DIMENSION).contains(d))
            .map(Some)
            .ok_or_else(|| {
                Failure::invalid_input(format!(
                    "{} must be between 1 and {}",
                    field, MAX_IMAGE_DIMENSION
                ))
            }),
    }
}

/// Keeps the last path component and replaces anything outside a
/// conservative character set.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or_default()
        .trim_start_matches('.');

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

fn sanitize_file_stem(name: &str) -> String {
    sanitize_file_name(name).replace(' ', "_")
}

/// Appends ` (n)` to the stem until the name is unused.
fn unique_name(seen: &mut HashSet<String>, name: &str) -> String {
    if seen.insert(name.to_lowercase()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s.to_string(), format!(".{}", e)),
        _ => (name.to_string(), String::new()),
    };

    let mut n = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if seen.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}
