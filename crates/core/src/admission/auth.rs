//! Request authentication.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

use crate::config::{AuthConfig, AuthMethod};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// What admission sees of an incoming request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub client_ip: IpAddr,
}

impl AuthRequest {
    pub fn new(client_ip: IpAddr) -> Self {
        Self {
            headers: HashMap::new(),
            client_ip,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// The caller a request was admitted as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub method: AuthMethod,
    pub client_ip: IpAddr,
}

impl Identity {
    pub fn anonymous(client_ip: IpAddr) -> Self {
        Self {
            subject: "anonymous".to_string(),
            method: AuthMethod::None,
            client_ip,
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    fn method(&self) -> AuthMethod;
}

/// Admits every request as anonymous. Must be configured explicitly.
#[derive(Debug, Default)]
pub struct NoneAuthenticator;

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(Identity::anonymous(request.client_ip))
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::None
    }
}

/// Checks a shared API key sent as `Authorization: Bearer <key>` or
/// `X-API-Key: <key>`.
pub struct ApiKeyAuthenticator {
    expected_key: Vec<u8>,
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            expected_key: api_key.into().into_bytes(),
        }
    }

    fn presented_key<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        if let Some(value) = request.header("authorization") {
            let (scheme, key) = value.split_once(' ')?;
            if scheme.eq_ignore_ascii_case("bearer") {
                return Some(key.trim());
            }
        }
        request.header("x-api-key").map(str::trim)
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let key = self
            .presented_key(request)
            .ok_or(AuthError::NotAuthenticated)?;

        if constant_time_eq(key.as_bytes(), &self.expected_key) {
            Ok(Identity {
                subject: "api_key".to_string(),
                method: AuthMethod::ApiKey,
                client_ip: request.client_ip,
            })
        } else {
            Err(AuthError::InvalidCredentials("invalid API key".to_string()))
        }
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::ApiKey
    }
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator)),
        AuthMethod::ApiKey => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AuthError::ConfigurationError(
                        "auth.api_key must be set for api_key auth".to_string(),
                    )
                })?;
            Ok(Box::new(ApiKeyAuthenticator::new(key)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AuthRequest {
        AuthRequest::new("10.0.0.7".parse().unwrap())
    }

    #[tokio::test]
    async fn test_none_is_anonymous() {
        let identity = NoneAuthenticator.authenticate(&request()).await.unwrap();
        assert_eq!(identity.subject, "anonymous");
        assert_eq!(identity.client_ip.to_string(), "10.0.0.7");
    }

    #[tokio::test]
    async fn test_api_key_bearer_and_header() {
        let auth = ApiKeyAuthenticator::new("s3cret");
        let bearer = request().with_header("Authorization", "bearer s3cret");
        assert_eq!(
            auth.authenticate(&bearer).await.unwrap().method,
            AuthMethod::ApiKey
        );
        let header = request().with_header("X-API-Key", "s3cret");
        assert!(auth.authenticate(&header).await.is_ok());
    }

    #[tokio::test]
    async fn test_api_key_rejections() {
        let auth = ApiKeyAuthenticator::new("s3cret");
        assert!(matches!(
            auth.authenticate(&request()).await,
            Err(AuthError::NotAuthenticated)
        ));
        let wrong = request().with_header("authorization", "Bearer nope");
        assert!(matches!(
            auth.authenticate(&wrong).await,
            Err(AuthError::InvalidCredentials(_))
        ));
        let basic = request().with_header("authorization", "Basic czNjcmV0");
        assert!(auth.authenticate(&basic).await.is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_create_authenticator() {
        let config = AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: None,
        };
        assert!(matches!(
            create_authenticator(&config),
            Err(AuthError::ConfigurationError(_))
        ));
        let config = AuthConfig {
            method: AuthMethod::None,
            api_key: None,
        };
        assert_eq!(create_authenticator(&config).unwrap().method(), AuthMethod::None);
    }
}
