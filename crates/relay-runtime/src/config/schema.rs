//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    /// Middleware pipeline settings.
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named values seeded into the dependency container.
    #[serde(default)]
    pub dependencies: HashMap<String, serde_json::Value>,
}

// =============================================================================
// Middleware configuration
// =============================================================================

/// Pipeline-wide and per-policy middleware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Initial state of the pipeline kill switch.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Validation policy settings.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Authorization policy settings.
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// Caching policy settings.
    #[serde(default)]
    pub caching: CachingConfig,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            validation: ValidationConfig::default(),
            authorization: AuthorizationConfig::default(),
            caching: CachingConfig::default(),
        }
    }
}

/// Validation middleware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Whether to install the validation policy.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Abort dispatches on error-severity rule failures.
    #[serde(default = "default_enabled")]
    pub strict_mode: bool,

    /// Pipeline priority.
    #[serde(default = "default_validation_priority")]
    pub priority: i32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            strict_mode: default_enabled(),
            priority: default_validation_priority(),
        }
    }
}

/// Authorization middleware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// Whether to install the authorization policy.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Pipeline priority.
    #[serde(default = "default_authorization_priority")]
    pub priority: i32,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            priority: default_authorization_priority(),
        }
    }
}

/// Caching middleware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingConfig {
    /// Whether to install the caching policy.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Pipeline priority.
    #[serde(default = "default_caching_priority")]
    pub priority: i32,

    /// TTL applied to cache policies created from this config, in seconds.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            priority: default_caching_priority(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl CachingConfig {
    /// The configured default TTL as a `Duration`.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_validation_priority() -> i32 {
    relay_framework::policies::VALIDATION_PRIORITY
}

fn default_authorization_priority() -> i32 {
    relay_framework::policies::AUTHORIZATION_PRIORITY
}

fn default_caching_priority() -> i32 {
    relay_framework::policies::CACHING_PRIORITY
}

fn default_ttl_secs() -> u64 {
    300
}

// =============================================================================
// Logging configuration
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread IDs in log output.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers in log output.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module level overrides, e.g. `relay_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    /// Span lifecycle event settings.
    #[serde(default)]
    pub span_events: SpanEventConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
            span_events: SpanEventConfig::default(),
        }
    }
}

/// Log level (trace, debug, info, warn, error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The lowercase level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line compact format.
    #[default]
    Compact,
    /// Default multi-field format.
    Full,
    /// Multi-line human-friendly format.
    Pretty,
    /// JSON lines, requires the `json-log` feature.
    Json,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Span lifecycle events to log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SpanEventConfig {
    /// Log span creation.
    #[serde(default)]
    pub new: bool,
    /// Log span entry.
    #[serde(default)]
    pub enter: bool,
    /// Log span exit.
    #[serde(default)]
    pub exit: bool,
    /// Log span close.
    #[serde(default)]
    pub close: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_priorities() {
        let config = RelayConfig::default();
        assert!(config.middleware.enabled);
        assert!(config.middleware.validation.strict_mode);
        assert_eq!(config.middleware.validation.priority, 10);
        assert_eq!(config.middleware.authorization.priority, 20);
        assert_eq!(config.middleware.caching.priority, 30);
        assert_eq!(config.middleware.caching.default_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn log_level_round_trips_through_serde() {
        let level: LogLevel = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
        assert_eq!(serde_json::to_string(&level).unwrap(), "\"debug\"");
    }
}
