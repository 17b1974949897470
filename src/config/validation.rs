use crate::config::types::{Config, DefaultsConfig, SchedulerConfig, SeedEntry, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_defaults(&config.defaults, config.scheduler.priority_range)?;
    validate_seeds(&config.seeds, config.scheduler.priority_range)?;
    Ok(())
}

/// Validates scheduler configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.max_connections < 1 {
        return Err(ConfigError::Validation(format!(
            "max-connections must be >= 1, got {}",
            config.max_connections
        )));
    }

    if config.priority_range < 1 {
        return Err(ConfigError::Validation(format!(
            "priority-range must be >= 1, got {}",
            config.priority_range
        )));
    }

    Ok(())
}

/// Validates per-task defaults
fn validate_defaults(config: &DefaultsConfig, priority_range: usize) -> Result<(), ConfigError> {
    if let Some(priority) = config.priority {
        validate_priority(priority, priority_range, "defaults.priority")?;
    }

    if let Some(label) = &config.incoming_encoding {
        if encoding_rs::Encoding::for_label(label.trim().as_bytes()).is_none() {
            return Err(ConfigError::Validation(format!(
                "incoming-encoding '{}' is not a known encoding",
                label
            )));
        }
    }

    if let Some(method) = &config.request.method {
        if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Validation(format!(
                "request.method must be an HTTP method, got '{}'",
                method
            )));
        }
    }

    if let Some(proxy) = &config.request.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    match &config.user_agent {
        Some(UserAgentConfig::Single(agent)) if agent.is_empty() => Err(
            ConfigError::Validation("user-agent cannot be empty".to_string()),
        ),
        Some(UserAgentConfig::List(agents)) if agents.is_empty() => Err(
            ConfigError::Validation("user-agent list cannot be empty".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Validates seed entries
fn validate_seeds(seeds: &[SeedEntry], priority_range: usize) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(&seed.uri).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URI '{}': {}", seed.uri, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URI '{}' must use HTTP or HTTPS",
                seed.uri
            )));
        }

        if let Some(group) = &seed.group {
            if group.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Seed URI '{}' has an empty group name",
                    seed.uri
                )));
            }
        }

        if let Some(priority) = seed.priority {
            validate_priority(priority, priority_range, "seed priority")?;
        }
    }

    Ok(())
}

fn validate_priority(priority: i64, priority_range: usize, field: &str) -> Result<(), ConfigError> {
    if priority < 0 || priority >= priority_range as i64 {
        return Err(ConfigError::Validation(format!(
            "{} must be in [0, {}), got {}",
            field, priority_range, priority
        )));
    }
    Ok(())
}
