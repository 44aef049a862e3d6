//! Failure responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use convertly_core::{BackendFailureKind, Failure, FailureKind, RequestId};

/// HTTP status for a failure kind.
pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InvalidInput => StatusCode::BAD_REQUEST,
        FailureKind::Unauthorized => StatusCode::UNAUTHORIZED,
        FailureKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        FailureKind::Overloaded | FailureKind::BackendUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        FailureKind::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
        FailureKind::BackendFailure(BackendFailureKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::BackendFailure(_) | FailureKind::NoOutputProduced => StatusCode::BAD_GATEWAY,
        FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: FailureKind,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A failed request, rendered as `{error, kind, retryable, request_id?}`.
#[derive(Debug)]
pub struct ApiError {
    failure: Failure,
    request_id: Option<RequestId>,
    status: StatusCode,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(failure: Failure) -> Self {
        Self {
            status: status_for(failure.kind),
            failure,
            request_id: None,
            retry_after_secs: None,
        }
    }

    pub fn for_job(failure: Failure, request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::new(failure)
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(Failure::invalid_input(message))
    }

    /// Keeps the status chosen by the framework (e.g. 413 for a body over
    /// the transport limit).
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_retry_after_ms(mut self, millis: u64) -> Self {
        self.retry_after_secs = Some(millis.div_ceil(1000).max(1));
        self
    }

    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Failure> for ApiError {
    fn from(failure: Failure) -> Self {
        Self::new(failure)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.failure.message,
            kind: self.failure.kind,
            retryable: self.failure.kind.is_retryable(),
            request_id: self.request_id.map(|id| id.to_string()),
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(FailureKind::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(FailureKind::ResourceExhausted),
            StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(
            status_for(FailureKind::BackendFailure(BackendFailureKind::Timeout)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(FailureKind::BackendFailure(BackendFailureKind::NonZeroExit)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(FailureKind::NoOutputProduced), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(FailureKind::Overloaded),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_body_omits_cause() {
        let failure = Failure::backend(BackendFailureKind::NonZeroExit, "Tool failed")
            .with_cause("/tmp/scratch/abc: invalid data");
        let response = ApiError::for_job(failure, RequestId::new()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "backend_non_zero_exit");
        assert_eq!(json["error"], "Tool failed");
        assert_eq!(json["retryable"], false);
        assert!(json["request_id"].is_string());
        assert!(!String::from_utf8_lossy(&body).contains("/tmp/scratch"));
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::new(Failure::rate_limited(1500))
            .with_retry_after_ms(1500)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
