//! # Relay Framework
//!
//! Dispatch-layer crate of the Relay in-process command framework.
//!
//! Builds on `relay-core` to provide:
//!
//! - **The middleware pipeline**: a priority-ordered chain of
//!   cross-cutting interceptors with pre, post, and error phases
//!   ([`Pipeline`], [`Middleware`], [`FnMiddleware`])
//! - **The facade bus**: the single dispatch entry point composing the
//!   handler buses, the pipeline, and the dependency container
//!   ([`MessageBus`], [`MessageBusBuilder`])
//! - **Reference policies**: validation, attribute-based authorization,
//!   reply caching, and dispatch tracing ([`policies`])

pub mod cache;
pub mod execution;
pub mod facade;
pub mod middleware;
pub mod pipeline;
pub mod policies;

pub use cache::MemoryCache;
pub use execution::{ExecutionContext, Phase};
pub use facade::{MessageBus, MessageBusBuilder};
pub use middleware::{FnMiddleware, Middleware};
pub use pipeline::{Executor, Pipeline};
