//! Admission: the gate a request passes before any job exists.
//!
//! Edge checks (per-client rate limit, authentication) run through an
//! [`AdmissionFilter`]. The [`ConcurrencyLimiter`] bounds how many admitted
//! jobs run at once.

mod auth;
mod limiter;
mod rate_limit;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use limiter::{AcquireError, ConcurrencyLimiter, JobPermit, LimiterStatus};
pub use rate_limit::{ClientRateLimiter, TokenBucket};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::failure::Failure;
use crate::metrics;

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Unauthorized(String),
    RateLimited { retry_after_ms: u64 },
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Unauthorized(_) => "unauthorized",
            DenyReason::RateLimited { .. } => "rate_limited",
        }
    }
}

impl From<DenyReason> for Failure {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthorized(message) => Failure::unauthorized(message),
            DenyReason::RateLimited { retry_after_ms } => Failure::rate_limited(retry_after_ms),
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allow(Identity),
    Deny(DenyReason),
}

#[async_trait]
pub trait AdmissionFilter: Send + Sync {
    async fn admit(&self, request: &AuthRequest) -> Admission;
}

/// Per-client rate limit followed by authentication.
///
/// Every request is charged to its client's bucket, including ones that
/// then fail authentication.
pub struct GatewayAdmission {
    authenticator: Box<dyn Authenticator>,
    rate_limiter: Option<ClientRateLimiter>,
}

impl GatewayAdmission {
    pub fn new(authenticator: Box<dyn Authenticator>, rate_limiter: Option<ClientRateLimiter>) -> Self {
        Self {
            authenticator,
            rate_limiter,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let authenticator = create_authenticator(&config.auth)?;
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| ClientRateLimiter::new(config.rate_limit.requests_per_minute));
        Ok(Self::new(authenticator, rate_limiter))
    }

    fn deny(reason: DenyReason) -> Admission {
        metrics::ADMISSION_REJECTIONS
            .with_label_values(&[reason.as_str()])
            .inc();
        Admission::Deny(reason)
    }
}

#[async_trait]
impl AdmissionFilter for GatewayAdmission {
    async fn admit(&self, request: &AuthRequest) -> Admission {
        if let Some(limiter) = &self.rate_limiter {
            if let Err(wait) = limiter.check(request.client_ip).await {
                debug!(client = %request.client_ip, ?wait, "Rate limited");
                return Self::deny(DenyReason::RateLimited {
                    retry_after_ms: wait.as_millis().max(1) as u64,
                });
            }
        }

        let identity = match self.authenticator.authenticate(request).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(client = %request.client_ip, error = %e, "Authentication failed");
                let message = match e {
                    AuthError::NotAuthenticated => "Authentication required",
                    _ => "Invalid credentials",
                };
                return Self::deny(DenyReason::Unauthorized(message.to_string()));
            }
        };

        Admission::Allow(identity)
    }
}
