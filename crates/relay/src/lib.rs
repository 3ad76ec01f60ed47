//! # Relay
//!
//! An in-process command dispatch framework: typed messages routed through
//! a single facade bus, wrapped in a priority-ordered middleware pipeline,
//! with propagated context scopes and an injected dependency container.
//!
//! ## Architecture
//!
//! ```text
//! caller ──▶ MessageBus ──▶ Pipeline (pre, ascending priority)
//!                               │
//!                               ▼
//!                  FeatureBus / ApplicationServiceBus ──▶ handler
//!                               │
//!                               ▼
//!                           Pipeline (post, descending priority)
//! ```
//!
//! - **Messages**: immutable value objects routed by type name, each bound
//!   to exactly one handler
//! - **Features**: atomic business-logic handlers
//! - **Application services**: orchestrating handlers that dispatch further
//!   feature messages through a restricted bus
//! - **Middleware**: cross-cutting interceptors with pre/post/error hooks;
//!   reference policies cover validation, authorization, caching, tracing
//! - **Scopes**: nestable propagated-context attributes with
//!   restore-on-exit semantics, snapshotted onto escaping errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay::prelude::*;
//!
//! #[derive(serde::Serialize)]
//! struct Ping { seq: u64 }
//! impl_message!(Ping);
//!
//! struct Pong;
//!
//! #[async_trait]
//! impl Feature for Pong {
//!     async fn execute(&self, message: &BoxedMessage, _ctx: &HandlerContext) -> BusResult {
//!         let seq = message.downcast_ref::<Ping>().unwrap().seq;
//!         Ok(Some(serde_json::json!({ "pong": seq })))
//!     }
//! }
//!
//! # async fn run() -> Result<(), BusError> {
//! let bus = MessageBus::builder()
//!     .feature("Ping", std::sync::Arc::new(Pong))
//!     .build()?;
//! let reply = bus.execute(BoxedMessage::new(Ping { seq: 1 })).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use relay_core as core;
pub use relay_framework as framework;
pub use relay_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use relay::prelude::*;
/// ```
pub mod prelude {
    // Composition root and configuration
    pub use relay_runtime::{ConfigLoader, RelayConfig, Runtime};

    // Facade bus - main entry point
    pub use relay_framework::{MessageBus, MessageBusBuilder};

    // Middleware pipeline
    pub use relay_framework::{ExecutionContext, FnMiddleware, Middleware, Phase, Pipeline};

    // Reference policies
    pub use relay_framework::policies::{
        AuthorizationMiddleware, CachePolicy, CachingMiddleware, Policy, Rule,
        TracingMiddleware, UserContext, ValidationMiddleware,
    };

    // Messages and handlers
    pub use relay_core::{
        ApplicationService, BoxedMessage, BusError, BusResult, Feature, HandlerContext, Message,
        Reply, impl_message,
    };

    // Propagated context and dependencies
    pub use relay_core::{ContextMap, ContextValue, Dependencies, Scope, ScopeStack, context_map};

    // Trait attribute macro re-exported for handler impls
    pub use async_trait::async_trait;
}
