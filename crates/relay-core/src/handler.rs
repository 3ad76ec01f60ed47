//! Handler abstractions.
//!
//! Two polymorphic handler roles exist:
//!
//! - [`Feature`] — an atomic, stateless-by-convention business-logic unit.
//! - [`ApplicationService`] — an orchestrating handler that may dispatch
//!   further feature messages through the restricted [`FeatureBus`] it is
//!   handed on each call. Services never see the service bus or the facade,
//!   so service→service orchestration cycles are unrepresentable.
//!
//! Both receive a [`HandlerContext`] threading the dependency container and
//! the propagated-context snapshot through the call, instead of relying on
//! mutable handler attributes. Handler instances are long-lived singletons
//! shared across dispatches; per-dispatch state lives in the context.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::FeatureBus;
use crate::dependencies::Dependencies;
use crate::error::{BusError, BusResult};
use crate::message::BoxedMessage;
use crate::scope::ContextMap;

/// Per-call state handed to every handler invocation.
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    dependencies: Arc<Dependencies>,
    scope: ContextMap,
}

impl HandlerContext {
    /// Creates a context from the shared container and a scope snapshot.
    pub fn new(dependencies: Arc<Dependencies>, scope: ContextMap) -> Self {
        Self {
            dependencies,
            scope,
        }
    }

    /// The shared dependency container.
    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Looks up a dependency, failing with a typed error when absent.
    pub fn require<T>(&self, name: &str) -> Result<Arc<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.dependencies.require(name)
    }

    /// The propagated-context attributes active for this dispatch.
    pub fn scope(&self) -> &ContextMap {
        &self.scope
    }
}

/// Options stored alongside a handler registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerOptions {
    /// When set, the bus wraps this handler's invocation in a tracing span.
    pub traced: bool,
}

impl HandlerOptions {
    /// Options with span creation enabled.
    pub fn traced() -> Self {
        Self { traced: true }
    }
}

/// An atomic business-logic handler bound to exactly one message type.
#[async_trait]
pub trait Feature: Send + Sync {
    /// Executes the feature for the given message.
    async fn execute(&self, message: &BoxedMessage, ctx: &HandlerContext) -> BusResult;
}

/// An orchestrating handler that may dispatch feature messages.
#[async_trait]
pub trait ApplicationService: Send + Sync {
    /// Executes the service; `features` is the only bus it can reach.
    async fn execute(
        &self,
        message: &BoxedMessage,
        features: &FeatureBus,
        ctx: &HandlerContext,
    ) -> BusResult;
}
