//! Reference middleware policies.
//!
//! Concrete [`Middleware`](crate::Middleware) implementations covering the
//! common cross-cutting concerns, each installable independently:
//!
//! | Policy                    | Default priority | Phase focus |
//! |---------------------------|------------------|-------------|
//! | [`TracingMiddleware`]     | 0                | all         |
//! | [`ValidationMiddleware`]  | 10               | pre         |
//! | [`AuthorizationMiddleware`] | 20             | pre         |
//! | [`CachingMiddleware`]     | 30               | pre + post  |

pub mod authorization;
pub mod caching;
pub mod observe;
pub mod validation;

pub use authorization::{
    AUTHORIZATION_PRIORITY, AuthorizationError, AuthorizationMiddleware, EvaluationContext,
    Policy, UserContext, UserLoader,
};
pub use caching::{CACHING_PRIORITY, CachePolicy, CachingMiddleware, default_cache_key};
pub use observe::{TRACING_PRIORITY, TracingMiddleware};
pub use validation::{
    Rule, RuleFailure, SchemaViolationError, Severity, VALIDATION_PRIORITY, ValidationError,
    ValidationMiddleware,
};
