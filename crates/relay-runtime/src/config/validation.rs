//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, MiddlewareConfig, RelayConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &RelayConfig) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_middleware(&config.middleware)?;
    Ok(())
}

fn validate_logging(config: &RelayConfig) -> ConfigResult<()> {
    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.output = \"file\" requires logging.file_path",
        ));
    }
    Ok(())
}

fn validate_middleware(config: &MiddlewareConfig) -> ConfigResult<()> {
    if config.caching.enabled && config.caching.default_ttl_secs == 0 {
        return Err(ConfigError::validation(
            "caching.default_ttl_secs must be greater than 0",
        ));
    }

    // Priorities of enabled policies must be distinct so the execution
    // order is deterministic regardless of installation order.
    let mut priorities: Vec<(&'static str, i32)> = Vec::new();
    if config.validation.enabled {
        priorities.push(("validation", config.validation.priority));
    }
    if config.authorization.enabled {
        priorities.push(("authorization", config.authorization.priority));
    }
    if config.caching.enabled {
        priorities.push(("caching", config.caching.priority));
    }
    for (i, (first, priority)) in priorities.iter().enumerate() {
        for (second, other) in &priorities[i + 1..] {
            if priority == other {
                return Err(ConfigError::DuplicatePriority {
                    first,
                    second,
                    priority: *priority,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        validate_config(&RelayConfig::default()).unwrap();
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = RelayConfig::default();
        config.middleware.caching.default_ttl_secs = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn disabled_caching_ignores_ttl() {
        let mut config = RelayConfig::default();
        config.middleware.caching.enabled = false;
        config.middleware.caching.default_ttl_secs = 0;
        validate_config(&config).unwrap();
    }

    #[test]
    fn duplicate_priorities_are_rejected() {
        let mut config = RelayConfig::default();
        config.middleware.authorization.priority = config.middleware.validation.priority;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::DuplicatePriority {
                first: "validation",
                second: "authorization",
                ..
            })
        ));
    }

    #[test]
    fn file_output_requires_a_path() {
        let mut config = RelayConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("relay.log".into());
        validate_config(&config).unwrap();
    }
}
