//! Common test utilities for driving the router in-process.
//!
//! The fixture builds the real router over an orchestrator whose backends
//! are chosen by the test (mocks or real in-process backends), with scratch
//! and public storage in a temp dir.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use convertly_core::{Backend, Config, GatewayAdmission, NoneAuthenticator};
use convertly_server::AppState;

/// Re-export fixtures for test convenience
pub use convertly_core::testing::fixtures;

const BOUNDARY: &str = "convertly-test-boundary";

/// Test fixture with an in-process router.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_zip() {
///     let fixture = TestFixture::new(vec![Arc::new(ZipBackend::new())]);
///     let response = fixture
///         .post_multipart("/api/zip", &[Part::file("files", "a.txt", b"a")])
///         .await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub config: Config,
    /// Scratch and public storage
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
    /// Parsed body, `Value::Null` when the body is not JSON.
    pub body: Value,
}

/// One multipart form field.
pub enum Part<'a> {
    File {
        name: &'a str,
        file_name: &'a str,
        data: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, file_name: &'a str, data: &'a [u8]) -> Self {
        Part::File {
            name,
            file_name,
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Part::Text { name, value }
    }
}

impl TestFixture {
    /// Fixture with auth disabled, no rate limit and the given backends.
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self::with_config(backends, |_| {})
    }

    /// Fixture whose config is adjusted by `configure` before wiring.
    pub fn with_config(backends: Vec<Arc<dyn Backend>>, configure: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = fixtures::config_in(temp_dir.path());
        config.rate_limit.enabled = false;
        configure(&mut config);

        let orchestrator = fixtures::orchestrator_from(&config, backends);
        let admission = match GatewayAdmission::from_config(&config) {
            Ok(admission) => admission,
            Err(_) => GatewayAdmission::new(Box::new(NoneAuthenticator), None),
        };
        let state = Arc::new(AppState::new(
            config.clone(),
            orchestrator,
            Arc::new(admission),
        ));
        let router = convertly_server::create_router(state);

        Self {
            router,
            config,
            temp_dir,
        }
    }

    pub fn scratch_files(&self) -> usize {
        fixtures::scratch_files(&self.config)
    }

    pub fn public_files(&self) -> usize {
        fixtures::public_files(&self.config)
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Send a POST request with JSON body.
    pub async fn post_json(&self, path: &str, body: Value) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    /// Send a POST request with a multipart form body.
    pub async fn post_multipart(&self, path: &str, parts: &[Part<'_>]) -> TestResponse {
        let request = multipart_request(path, parts, &[]);
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            bytes,
            body,
        }
    }
}

/// Builds a multipart POST with optional extra headers.
pub fn multipart_request(path: &str, parts: &[Part<'_>], headers: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                name,
                file_name,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body)).unwrap()
}
