use super::{types::Config, ConfigError};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.youtube.api_credentials.is_empty() {
        return Err(ConfigError::ValidationError(
            "youtube.api_credentials must contain at least one key".to_string(),
        ));
    }

    if config.youtube.api_credentials.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::ValidationError(
            "youtube.api_credentials cannot contain empty keys".to_string(),
        ));
    }

    if config.credentials.consecutive_failure_disable_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "credentials.consecutive_failure_disable_threshold must be at least 1".to_string(),
        ));
    }

    if config.resolver.backoff_base_ms > config.resolver.backoff_max_ms {
        return Err(ConfigError::ValidationError(format!(
            "resolver.backoff_base_ms ({}) exceeds resolver.backoff_max_ms ({})",
            config.resolver.backoff_base_ms, config.resolver.backoff_max_ms
        )));
    }

    if config.resolver.owner_requests_per_second == 0 {
        return Err(ConfigError::ValidationError(
            "resolver.owner_requests_per_second cannot be 0".to_string(),
        ));
    }

    if config.jobs.max_attempts_per_job == 0 {
        return Err(ConfigError::ValidationError(
            "jobs.max_attempts_per_job must be at least 1".to_string(),
        ));
    }

    if config.jobs.workers == 0 {
        return Err(ConfigError::ValidationError(
            "jobs.workers must be at least 1".to_string(),
        ));
    }

    if config.jobs.finalize_sweep_secs == 0 {
        return Err(ConfigError::ValidationError(
            "jobs.finalize_sweep_secs must be at least 1".to_string(),
        ));
    }

    Ok(())
}
