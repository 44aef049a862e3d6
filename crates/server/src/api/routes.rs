use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use convertly_core::config::{LimitsConfig, StorageConfig};

use super::middleware::{admission_middleware, metrics_middleware};
use super::{convert, handlers};
use crate::state::AppState;

/// Room for multipart framing and text fields on top of the uploads.
const BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let config = state.config();

    // Conversion routes, behind admission
    let conversion_routes = Router::new()
        .route("/text-to-speech", post(convert::text_to_speech))
        .route("/image-convert", post(convert::image_convert))
        .route("/image-to-pdf", post(convert::image_to_pdf))
        .route("/document-to-pdf", post(convert::document_to_pdf))
        .route("/zip", post(convert::zip))
        .route("/video-to-audio", post(convert::video_to_audio))
        .route("/download", post(convert::download))
        .layer(DefaultBodyLimit::max(body_limit(&config.limits)))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ));

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        .merge(conversion_routes);

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/metrics", get(handlers::metrics))
        .nest("/api", api_routes);

    // Published artifacts
    if let Some(mount) = public_mount(&config.storage) {
        info!(mount = %mount, dir = %config.storage.public_dir.display(), "Serving published files");
        router = router.nest_service(&mount, ServeDir::new(&config.storage.public_dir));
    }

    router
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Largest request body accepted by conversion routes.
fn body_limit(limits: &LimitsConfig) -> usize {
    usize::try_from(limits.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(limits.max_files.max(1))
        .saturating_add(BODY_OVERHEAD_BYTES)
}

/// Path to mount the public directory on, when the base URL is local.
fn public_mount(storage: &StorageConfig) -> Option<String> {
    let base = storage.public_base_url.trim_end_matches('/');
    (base.starts_with('/') && base.len() > 1).then(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_mount() {
        let mut storage = StorageConfig::default();
        assert_eq!(public_mount(&storage).as_deref(), Some("/files"));

        storage.public_base_url = "/downloads/".to_string();
        assert_eq!(public_mount(&storage).as_deref(), Some("/downloads"));

        storage.public_base_url = "https://cdn.example/files".to_string();
        assert_eq!(public_mount(&storage), None);

        storage.public_base_url = "/".to_string();
        assert_eq!(public_mount(&storage), None);
    }

    #[test]
    fn test_body_limit_covers_all_uploads() {
        let limits = LimitsConfig {
            max_upload_bytes: 10,
            max_files: 3,
            ..LimitsConfig::default()
        };
        assert_eq!(body_limit(&limits), 30 + BODY_OVERHEAD_BYTES);
    }
}
