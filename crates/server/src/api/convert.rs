//! Conversion endpoints.
//!
//! Each handler turns the HTTP body into a [`ConversionRequest`] and hands it
//! to the orchestrator. Multipart file fields become uploads; every other
//! text field becomes an option.

use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        rejection::JsonRejection,
        State,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use convertly_core::{orchestrator::ConversionResult, ConversionRequest, JobKind};

use super::error::ApiError;
use crate::state::AppState;

/// Successful conversion: `{request_id, type, ...}`.
#[derive(Debug, Serialize)]
pub struct ConversionResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub result: ConversionResult,
}

type ConversionReply = Result<Json<ConversionResponse>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct TextToSpeechBody {
    pub text: Option<String>,
    pub lang: Option<String>,
    #[serde(default)]
    pub slow: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    pub url: Option<String>,
    pub mode: Option<String>,
}

pub async fn text_to_speech(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TextToSpeechBody>, JsonRejection>,
) -> ConversionReply {
    let Json(body) = body.map_err(|e| ApiError::invalid_input(e.body_text()))?;

    let mut request = ConversionRequest::new(JobKind::TextToSpeech);
    request.text = body.text;
    if let Some(lang) = body.lang {
        request = request.with_option("lang", lang);
    }
    if let Some(slow) = body.slow {
        request = request.with_option("slow", slow.to_string());
    }
    run(&state, request).await
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> ConversionReply {
    let Json(body) = body.map_err(|e| ApiError::invalid_input(e.body_text()))?;

    let mut request = ConversionRequest::new(JobKind::RemoteDownload);
    request.url = body.url;
    if let Some(mode) = body.mode {
        request = request.with_option("mode", mode);
    }
    run(&state, request).await
}

pub async fn image_convert(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ConversionReply {
    let request = read_multipart(&state, JobKind::ImageConvert, &["file", "image"], multipart).await?;
    run(&state, request).await
}

pub async fn image_to_pdf(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ConversionReply {
    let request = read_multipart(&state, JobKind::DocumentToPdf, &["image", "file"], multipart).await?;
    run(&state, request).await
}

pub async fn document_to_pdf(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ConversionReply {
    let request =
        read_multipart(&state, JobKind::DocumentToPdf, &["file", "document"], multipart).await?;
    run(&state, request).await
}

pub async fn zip(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ConversionReply {
    let request = read_multipart(&state, JobKind::ZipPack, &["files", "file"], multipart).await?;
    run(&state, request).await
}

pub async fn video_to_audio(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ConversionReply {
    let request = read_multipart(&state, JobKind::VideoToAudio, &["file", "video"], multipart).await?;
    run(&state, request).await
}

async fn run(state: &AppState, request: ConversionRequest) -> ConversionReply {
    let report = state.orchestrator().run(request).await;
    match report.outcome {
        Ok(result) => Ok(Json(ConversionResponse {
            request_id: report.request_id.to_string(),
            result,
        })),
        Err(failure) => Err(ApiError::for_job(failure, report.request_id)),
    }
}

/// Collects uploads from `file_fields` and every other field as an option.
///
/// Uploads are read chunk by chunk; a file that passes the per-file limit is
/// rejected as soon as it does, without buffering the rest of it.
async fn read_multipart(
    state: &AppState,
    kind: JobKind,
    file_fields: &[&str],
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ConversionRequest, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let max_upload_bytes = state.config().limits.max_upload_bytes;
    let mut request = ConversionRequest::new(kind);

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if file_fields.contains(&name.as_str()) {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let mut data = Vec::new();
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                if (data.len() + chunk.len()) as u64 > max_upload_bytes {
                    debug!(field = %name, file = %file_name, "Upload over the per-file limit");
                    return Err(ApiError::invalid_input(format!(
                        "File {} exceeds the limit of {} bytes",
                        file_name, max_upload_bytes
                    )));
                }
                data.extend_from_slice(&chunk);
            }
            debug!(field = %name, file = %file_name, size = data.len(), "Received upload");
            request = request.with_file(file_name, data);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            request = request.with_option(name, value);
        }
    }

    Ok(request)
}

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::invalid_input(e.body_text()).with_status(e.status())
}
