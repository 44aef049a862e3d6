use super::{
    types::{AuthMethod, Config},
    ConfigError,
};
use crate::job::JobKind;

/// Validate configuration
/// Currently validates:
/// - Auth section exists (enforced by serde) and api_key auth carries a key
/// - Server port is not 0
/// - Limits and timeout budgets are non-zero
/// - Scratch and public directories are distinct
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().unwrap_or("").is_empty()
    {
        return Err(ConfigError::ValidationError(
            "auth.api_key must be set when auth.method = \"api_key\"".to_string(),
        ));
    }

    let limits = &config.limits;
    if limits.max_concurrent_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "limits.max_concurrent_jobs cannot be 0".to_string(),
        ));
    }
    if limits.max_upload_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "limits.max_upload_bytes cannot be 0".to_string(),
        ));
    }
    if limits.max_files == 0 {
        return Err(ConfigError::ValidationError(
            "limits.max_files cannot be 0".to_string(),
        ));
    }

    for kind in JobKind::ALL {
        if config.timeouts.budget_for(kind).is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "timeouts.{} cannot be 0",
                kind.as_str()
            )));
        }
    }

    if config.storage.scratch_dir == config.storage.public_dir {
        return Err(ConfigError::ValidationError(
            "storage.scratch_dir and storage.public_dir must differ".to_string(),
        ));
    }

    if config.rate_limit.enabled && config.rate_limit.requests_per_minute == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limit.requests_per_minute cannot be 0 while enabled".to_string(),
        ));
    }

    Ok(())
}
