//! Runtime composition root.
//!
//! [`Runtime`] ties the configuration layer to the dispatch layer: it loads
//! and validates a [`RelayConfig`], initializes logging, and produces
//! [`MessageBusBuilder`]s pre-populated with the config's dependency values
//! and pipeline settings. The per-policy sections drive the construction of
//! the reference middleware.

use tracing::debug;

use relay_framework::MessageBusBuilder;
use relay_framework::policies::{
    AuthorizationMiddleware, CachePolicy, CachingMiddleware, TracingMiddleware,
    ValidationMiddleware,
};

use crate::config::{ConfigLoader, ConfigResult, RelayConfig, validate_config};
use crate::logging;

/// The configured entry point for assembling a Relay application.
#[derive(Debug, Clone)]
pub struct Runtime {
    config: RelayConfig,
}

impl Runtime {
    /// Loads configuration from the default sources and builds a runtime.
    pub fn load() -> ConfigResult<Self> {
        Self::from_config(ConfigLoader::new().load()?)
    }

    /// Builds a runtime from an already-assembled configuration.
    pub fn from_config(config: RelayConfig) -> ConfigResult<Self> {
        validate_config(&config)?;
        debug!(
            middleware_enabled = config.middleware.enabled,
            dependencies = config.dependencies.len(),
            "Runtime created"
        );
        Ok(Self { config })
    }

    /// The effective configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Initializes the global tracing subscriber from the logging section.
    pub fn init_logging(&self) {
        logging::init_from_config(&self.config.logging);
    }

    /// Returns a bus builder seeded with the configured dependency values
    /// and the pipeline kill-switch state.
    ///
    /// Dependency values from the config are inserted as
    /// `serde_json::Value`; handlers retrieve them with
    /// `ctx.require::<serde_json::Value>(name)`.
    pub fn builder(&self) -> MessageBusBuilder {
        let mut builder =
            MessageBusBuilder::new().middleware_enabled(self.config.middleware.enabled);
        for (name, value) in &self.config.dependencies {
            builder = builder.dependency(name.clone(), value.clone());
        }
        builder
    }

    /// A validation middleware configured from the validation section, or
    /// `None` when disabled.
    pub fn validation_middleware(&self) -> Option<ValidationMiddleware> {
        let section = &self.config.middleware.validation;
        section.enabled.then(|| {
            ValidationMiddleware::with_priority(section.priority).strict(section.strict_mode)
        })
    }

    /// An authorization middleware configured from the authorization
    /// section, or `None` when disabled. The caller still installs the
    /// user loader and policies.
    pub fn authorization_middleware(&self) -> Option<AuthorizationMiddleware> {
        let section = &self.config.middleware.authorization;
        section
            .enabled
            .then(|| AuthorizationMiddleware::with_priority(section.priority))
    }

    /// A caching middleware configured from the caching section, or `None`
    /// when disabled.
    pub fn caching_middleware(&self) -> Option<CachingMiddleware> {
        let section = &self.config.middleware.caching;
        section.enabled.then(|| {
            CachingMiddleware::with_cache(Default::default(), section.priority)
        })
    }

    /// A cache policy carrying the configured default TTL.
    pub fn default_cache_policy(&self) -> CachePolicy {
        CachePolicy::new(self.config.middleware.caching.default_ttl())
    }

    /// The outermost tracing middleware.
    pub fn tracing_middleware(&self) -> TracingMiddleware {
        TracingMiddleware::new()
    }
}
