//! Admission and metrics middleware.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use convertly_core::{Admission, AuthRequest, DenyReason, Failure};

use super::error::ApiError;
use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Runs the admission filter before a conversion handler. Denied requests
/// never reach the orchestrator.
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_request = auth_request(&request);

    match state.admission().admit(&auth_request).await {
        Admission::Allow(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Admission::Deny(reason) => {
            let retry_after_ms = match &reason {
                DenyReason::Unauthorized(_) => {
                    AUTH_FAILURES_TOTAL
                        .with_label_values(&[reason.as_str()])
                        .inc();
                    None
                }
                DenyReason::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            };
            let mut error = ApiError::new(Failure::from(reason));
            if let Some(ms) = retry_after_ms {
                error = error.with_retry_after_ms(ms);
            }
            error.into_response()
        }
    }
}

/// Headers (lowercased) and peer address. Requests without connection info
/// (in-process tests) are treated as coming from localhost.
fn auth_request(request: &Request<Body>) -> AuthRequest {
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    AuthRequest { headers, client_ip }
}
