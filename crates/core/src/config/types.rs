use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobKind;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    10000
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Shared key for `api_key` auth.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// Scratch and publish locations for conversion artifacts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root under which every job gets its own scratch directory.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Directory served by the static file server.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// URL prefix under which `public_dir` is reachable.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Upper bound on bytes held in scratch across all jobs.
    #[serde(default = "default_max_scratch_bytes")]
    pub max_scratch_bytes: u64,

    /// Upper bound on artifacts a single job may allocate.
    #[serde(default = "default_max_artifacts_per_job")]
    pub max_artifacts_per_job: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            public_dir: default_public_dir(),
            public_base_url: default_public_base_url(),
            max_scratch_bytes: default_max_scratch_bytes(),
            max_artifacts_per_job: default_max_artifacts_per_job(),
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("convertly").join("scratch")
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public/files")
}

fn default_public_base_url() -> String {
    "/files".to_string()
}

fn default_max_scratch_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_artifacts_per_job() -> usize {
    64
}

/// Request and concurrency limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum size of a single uploaded input.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Maximum number of uploaded inputs per request.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum text length accepted for speech synthesis.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Jobs allowed in `Running` at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Jobs allowed to wait for a slot before new ones are rejected.
    #[serde(default = "default_max_queued_jobs")]
    pub max_queued_jobs: usize,

    /// How long a job may wait for a slot.
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,

    /// Cap on captured stdout/stderr of an external tool.
    #[serde(default = "default_max_tool_output_bytes")]
    pub max_tool_output_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            max_files: default_max_files(),
            max_text_chars: default_max_text_chars(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_queued_jobs: default_max_queued_jobs(),
            queue_timeout_secs: default_queue_timeout_secs(),
            max_tool_output_bytes: default_max_tool_output_bytes(),
        }
    }
}

impl LimitsConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_max_files() -> usize {
    20
}

fn default_max_text_chars() -> usize {
    200
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_max_queued_jobs() -> usize {
    64
}

fn default_queue_timeout_secs() -> u64 {
    30
}

fn default_max_tool_output_bytes() -> usize {
    1024 * 1024
}

/// Per-kind wall-clock budgets, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_tts_timeout")]
    pub text_to_speech: u64,
    #[serde(default = "default_image_timeout")]
    pub image_convert: u64,
    #[serde(default = "default_document_timeout")]
    pub document_to_pdf: u64,
    #[serde(default = "default_zip_timeout")]
    pub zip_pack: u64,
    #[serde(default = "default_video_timeout")]
    pub video_to_audio: u64,
    #[serde(default = "default_download_timeout")]
    pub remote_download: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            text_to_speech: default_tts_timeout(),
            image_convert: default_image_timeout(),
            document_to_pdf: default_document_timeout(),
            zip_pack: default_zip_timeout(),
            video_to_audio: default_video_timeout(),
            remote_download: default_download_timeout(),
        }
    }
}

impl TimeoutsConfig {
    /// Budget for a single backend invocation of the given kind.
    pub fn budget_for(&self, kind: JobKind) -> Duration {
        let secs = match kind {
            JobKind::TextToSpeech => self.text_to_speech,
            JobKind::ImageConvert => self.image_convert,
            JobKind::DocumentToPdf => self.document_to_pdf,
            JobKind::ZipPack => self.zip_pack,
            JobKind::VideoToAudio => self.video_to_audio,
            JobKind::RemoteDownload => self.remote_download,
        };
        Duration::from_secs(secs)
    }

    /// Sets the same budget for every kind.
    pub fn uniform(secs: u64) -> Self {
        Self {
            text_to_speech: secs,
            image_convert: secs,
            document_to_pdf: secs,
            zip_pack: secs,
            video_to_audio: secs,
            remote_download: secs,
        }
    }
}

fn default_tts_timeout() -> u64 {
    10
}

fn default_image_timeout() -> u64 {
    60
}

fn default_document_timeout() -> u64 {
    120
}

fn default_zip_timeout() -> u64 {
    60
}

fn default_video_timeout() -> u64 {
    600
}

fn default_download_timeout() -> u64 {
    900
}

/// Optional overrides for external tool locations. Unset tools are looked up
/// on `PATH`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    #[serde(default)]
    pub yt_dlp: Option<PathBuf>,
    #[serde(default)]
    pub soffice: Option<PathBuf>,
}

/// Per-client request rate limiting at the edge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_requests_per_minute() -> u32 {
    100
}

/// Text-to-speech provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_host")]
    pub host: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            host: default_tts_host(),
        }
    }
}

fn default_tts_host() -> String {
    "https://translate.google.com".to_string()
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub storage: SanitizedStorageConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutsConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
}

/// Storage config without filesystem paths.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub public_base_url: String,
    pub max_scratch_bytes: u64,
    pub max_artifacts_per_job: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: config.auth.method.as_str().to_string(),
                api_key_configured: config
                    .auth
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
            },
            server: config.server.clone(),
            storage: SanitizedStorageConfig {
                public_base_url: config.storage.public_base_url.clone(),
                max_scratch_bytes: config.storage.max_scratch_bytes,
                max_artifacts_per_job: config.storage.max_artifacts_per_job,
            },
            limits: config.limits.clone(),
            timeouts: config.timeouts.clone(),
            rate_limit: config.rate_limit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_valid_config_with_none_auth() {
        let toml = r#"
[auth]
method = "none"

[server]
host = "127.0.0.1"
port = 9000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::None);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let toml = r#"
[auth]
method = "none"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.limits.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.limits.max_text_chars, 200);
        assert_eq!(config.storage.public_base_url, "/files");
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.requests_per_minute, 100);
        assert_eq!(config.tts.host, "https://translate.google.com");
        assert!(config.tools.ffmpeg.is_none());
    }

    #[test]
    fn test_deserialize_missing_auth_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_budget_for_kind() {
        let timeouts = TimeoutsConfig::default();
        assert_eq!(
            timeouts.budget_for(JobKind::TextToSpeech),
            Duration::from_secs(10)
        );
        assert_eq!(
            timeouts.budget_for(JobKind::RemoteDownload),
            Duration::from_secs(900)
        );
        assert!(
            timeouts.budget_for(JobKind::VideoToAudio) > timeouts.budget_for(JobKind::ImageConvert)
        );

        let uniform = TimeoutsConfig::uniform(3);
        assert_eq!(uniform.budget_for(JobKind::ZipPack), Duration::from_secs(3));
    }

    #[test]
    fn test_deserialize_tools() {
        let toml = r#"
[auth]
method = "none"

[tools]
ffmpeg = "/opt/ffmpeg/bin/ffmpeg"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.tools.ffmpeg,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert!(config.tools.yt_dlp.is_none());
    }

    #[test]
    fn test_sanitized_config_hides_key() {
        let toml = r#"
[auth]
method = "api_key"
api_key = "secret-key"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.auth.method, "api_key");
        assert!(sanitized.auth.api_key_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
        assert!(!json.contains("scratch_dir"));
    }
}
