//! Feature and application-service buses.
//!
//! A bus resolves a message to its registered handler and invokes it. Each
//! bus level may hold an optional error handler that gets a chance to
//! recover from (or convert) any error raised during execution, forming a
//! layered catch-here-or-bubble-up policy: the feature bus converts first,
//! the application-service bus catches what bubbles from features, and the
//! facade gets the final word.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{Instrument, Level, debug, span};

use crate::error::{BusError, BusResult};
use crate::handler::{ApplicationService, Feature, HandlerContext, HandlerOptions};
use crate::message::BoxedMessage;
use crate::registry::HandlerRegistry;

/// A bus-level error recovery hook.
///
/// Invoked with the error raised during execution. Returning `Ok(reply)`
/// swallows the error and substitutes the reply (which may be `None`);
/// returning `Err` propagates — the hook may re-raise the same error or a
/// converted one.
pub type ErrorHandler = Arc<dyn Fn(BusError) -> BusResult + Send + Sync>;

fn recover(result: BusResult, handler: &RwLock<Option<ErrorHandler>>) -> BusResult {
    match result {
        Err(err) => {
            let hook = handler.read().clone();
            match hook {
                Some(hook) => hook(err),
                None => Err(err),
            }
        }
        ok => ok,
    }
}

// =============================================================================
// FeatureBus
// =============================================================================

/// Dispatches messages to atomic [`Feature`] handlers.
pub struct FeatureBus {
    registry: HandlerRegistry<dyn Feature>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl Default for FeatureBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureBus {
    /// Creates an empty feature bus.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new("feature"),
            error_handler: RwLock::new(None),
        }
    }

    /// Registers a feature for a message type name.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn Feature>,
    ) -> Result<(), BusError> {
        self.registry.register(name, handler)
    }

    /// Registers a feature with explicit options.
    pub fn register_with(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn Feature>,
        options: HandlerOptions,
    ) -> Result<(), BusError> {
        self.registry.register_with(name, handler, options)
    }

    /// Installs the bus-level error handler.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write() = Some(handler);
    }

    /// Whether a handler is bound for the name.
    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Registered message type names.
    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Resolves and executes the handler for `message`.
    ///
    /// Fails with [`BusError::UnknownMessage`] when nothing is bound. Any
    /// error is offered to the bus error handler before propagating.
    pub async fn execute(&self, message: &BoxedMessage, ctx: &HandlerContext) -> BusResult {
        let result = self.dispatch(message, ctx).await;
        recover(result, &self.error_handler)
    }

    async fn dispatch(&self, message: &BoxedMessage, ctx: &HandlerContext) -> BusResult {
        let name = message.name();
        let Some(registration) = self.registry.lookup(name) else {
            return Err(BusError::UnknownMessage {
                name: name.to_string(),
            });
        };

        debug!(message = %name, "Executing feature");
        if registration.options.traced {
            registration
                .handler
                .execute(message, ctx)
                .instrument(span!(Level::DEBUG, "feature", message = %name))
                .await
        } else {
            registration.handler.execute(message, ctx).await
        }
    }
}

impl std::fmt::Debug for FeatureBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureBus")
            .field("handlers", &self.registry.len())
            .finish()
    }
}

// =============================================================================
// ApplicationServiceBus
// =============================================================================

/// Dispatches messages to orchestrating [`ApplicationService`] handlers.
///
/// Holds the [`FeatureBus`] it hands to each service, which is the only
/// dispatch surface services ever see.
pub struct ApplicationServiceBus {
    registry: HandlerRegistry<dyn ApplicationService>,
    features: Arc<FeatureBus>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl ApplicationServiceBus {
    /// Creates a service bus delegating feature dispatch to `features`.
    pub fn new(features: Arc<FeatureBus>) -> Self {
        Self {
            registry: HandlerRegistry::new("application service"),
            features,
            error_handler: RwLock::new(None),
        }
    }

    /// Registers an application service for a message type name.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ApplicationService>,
    ) -> Result<(), BusError> {
        self.registry.register(name, handler)
    }

    /// Registers an application service with explicit options.
    pub fn register_with(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ApplicationService>,
        options: HandlerOptions,
    ) -> Result<(), BusError> {
        self.registry.register_with(name, handler, options)
    }

    /// Installs the bus-level error handler.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write() = Some(handler);
    }

    /// Whether a handler is bound for the name.
    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Registered message type names.
    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// The feature sub-bus handed to services.
    pub fn features(&self) -> &Arc<FeatureBus> {
        &self.features
    }

    /// Resolves and executes the service for `message`.
    pub async fn execute(&self, message: &BoxedMessage, ctx: &HandlerContext) -> BusResult {
        let result = self.dispatch(message, ctx).await;
        recover(result, &self.error_handler)
    }

    async fn dispatch(&self, message: &BoxedMessage, ctx: &HandlerContext) -> BusResult {
        let name = message.name();
        let Some(registration) = self.registry.lookup(name) else {
            return Err(BusError::UnknownMessage {
                name: name.to_string(),
            });
        };

        debug!(message = %name, "Executing application service");
        if registration.options.traced {
            registration
                .handler
                .execute(message, &self.features, ctx)
                .instrument(span!(Level::DEBUG, "application_service", message = %name))
                .await
        } else {
            registration.handler.execute(message, &self.features, ctx).await
        }
    }
}

impl std::fmt::Debug for ApplicationServiceBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationServiceBus")
            .field("handlers", &self.registry.len())
            .finish()
    }
}
