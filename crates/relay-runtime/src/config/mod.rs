//! Configuration module for the Relay runtime.
//!
//! Provides layered configuration loading (defaults, profile files, main
//! files, `RELAY_*` environment variables, programmatic overrides) and a
//! validation pass over the extracted schema.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    AuthorizationConfig, CachingConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    MiddlewareConfig, RelayConfig, SpanEventConfig, ValidationConfig,
};
pub use validation::validate_config;
