//! # Relay Core
//!
//! Foundation crate of the Relay in-process command dispatch framework.
//!
//! This crate provides the building blocks the higher layers compose:
//!
//! - **Messages**: type-erased, immutable value objects routed by type name
//!   ([`Message`], [`BoxedMessage`], structural [`MessageSchema`]s)
//! - **Handlers**: atomic [`Feature`]s and orchestrating
//!   [`ApplicationService`]s, invoked with a per-call [`HandlerContext`]
//! - **Registries & buses**: one-shot name → handler bindings with layered
//!   error-recovery hooks ([`HandlerRegistry`], [`FeatureBus`],
//!   [`ApplicationServiceBus`])
//! - **Propagated context**: nestable, restore-on-exit attribute scopes
//!   owned per call chain ([`ScopeStack`], [`Scope`])
//! - **Dependency container**: named shared values threaded to handlers
//!   ([`Dependencies`])
//!
//! The middleware pipeline and the facade bus live in `relay-framework`;
//! configuration and logging live in `relay-runtime`.

pub mod bus;
pub mod dependencies;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod scope;

pub use bus::{ApplicationServiceBus, ErrorHandler, FeatureBus};
pub use dependencies::Dependencies;
pub use error::{BusError, BusResult, Reply};
pub use handler::{ApplicationService, Feature, HandlerContext, HandlerOptions};
pub use message::{
    BoxedMessage, FieldKind, FieldSpec, Message, MessageSchema, SchemaViolation,
};
pub use registry::{HandlerRegistry, Registration};
pub use scope::{ContextMap, ContextSnapshot, ContextValue, Scope, ScopeStack};

// Re-exported for use by the `impl_message!` and `context_map!` macros.
#[doc(hidden)]
pub use serde_json;
