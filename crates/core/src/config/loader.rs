use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment variable prefix for overrides (`CONVERTLY_LIMITS__MAX_FILES=4`).
const ENV_PREFIX: &str = "CONVERTLY_";

/// Plain listen-port variable set by most hosting platforms.
const PORT_ENV: &str = "PORT";

/// Load configuration from file with environment variable overrides.
///
/// Precedence, lowest first: the file, `PORT`, `CONVERTLY_*` variables.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::raw().only(&[PORT_ENV]).map(|_| "server.port".into()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[auth]
method = "none"

[server]
port = 9000
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.limits.max_concurrent_jobs, 4);
    }

    #[test]
    fn test_load_config_from_str_missing_auth() {
        let toml = r#"
[server]
port = 8080
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    const FILE_CONFIG: &str = r#"
[auth]
method = "api_key"
api_key = "s3cret"

[server]
host = "127.0.0.1"
port = 3000

[limits]
max_concurrent_jobs = 2
queue_timeout_secs = 5

[timeouts]
video_to_audio = 30
"#;

    // Jailed: tests that read the environment must not run concurrently.
    #[test]
    fn test_load_config_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file("convertly.toml", FILE_CONFIG)?;

            let config = load_config(Path::new("convertly.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 3000);
            assert_eq!(config.server.host.to_string(), "127.0.0.1");
            assert_eq!(config.auth.api_key.as_deref(), Some("s3cret"));
            assert_eq!(config.limits.max_concurrent_jobs, 2);
            assert_eq!(config.limits.queue_timeout_secs, 5);
            assert_eq!(config.timeouts.video_to_audio, 30);
            // untouched budgets keep their defaults
            assert_eq!(config.timeouts.text_to_speech, 10);
            Ok(())
        });
    }

    #[test]
    fn test_port_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("convertly.toml", FILE_CONFIG)?;
            jail.set_env("PORT", "4321");

            let config = load_config(Path::new("convertly.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 4321);
            assert_eq!(config.server.host.to_string(), "127.0.0.1");
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_wins_over_port() {
        Jail::expect_with(|jail| {
            jail.create_file("convertly.toml", FILE_CONFIG)?;
            jail.set_env("PORT", "4321");
            jail.set_env("CONVERTLY_SERVER__PORT", "5555");
            jail.set_env("CONVERTLY_LIMITS__MAX_FILES", "3");

            let config = load_config(Path::new("convertly.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 5555);
            assert_eq!(config.limits.max_files, 3);
            Ok(())
        });
    }
}
