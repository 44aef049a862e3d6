use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use convertly_core::{
    admission::LimiterStatus, backend::ToolInfo, JobKind, SanitizedConfig,
};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

pub async fn root() -> &'static str {
    "convertly is running"
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub kind: JobKind,
    pub available: bool,
}

#[derive(Serialize)]
pub struct StorageStatus {
    pub bytes_in_use: u64,
    pub max_scratch_bytes: u64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub limiter: LimiterStatus,
    pub tools: Vec<ToolInfo>,
    pub backends: Vec<BackendStatus>,
    pub storage: StorageStatus,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let orchestrator = state.orchestrator();
    let invoker = orchestrator.invoker();

    Json(StatusResponse {
        limiter: orchestrator.limiter().status(),
        tools: invoker.tools().check_all(),
        backends: JobKind::ALL
            .iter()
            .map(|kind| BackendStatus {
                kind: *kind,
                available: invoker.is_available(*kind),
            })
            .collect(),
        storage: StorageStatus {
            bytes_in_use: orchestrator.store().bytes_in_use(),
            max_scratch_bytes: state.config().storage.max_scratch_bytes,
        },
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
