//! The middleware contract.
//!
//! A middleware is a cross-cutting interceptor with three hooks wrapped
//! around every dispatch: `pre_execute` before the handler (ascending
//! priority), `post_execute` after it (descending priority), and `on_error`
//! when anything raised (descending priority). Lower priority values run
//! earlier in the pre phase and later in the post/error phases, forming an
//! onion: the lowest-priority middleware is outermost, sees the raw input
//! first and the final output last.

use std::sync::Arc;

use async_trait::async_trait;

use relay_core::{BusError, BusResult, Reply};

use crate::execution::ExecutionContext;

/// A cross-cutting interceptor participating in the dispatch pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable name, used in logs and metadata keys.
    fn name(&self) -> &str;

    /// Ordering key. Lower values run earlier in the pre phase and later
    /// in the post/error phases. Ties keep insertion order.
    fn priority(&self) -> i32;

    /// Whether this middleware participates at all.
    fn enabled(&self) -> bool {
        true
    }

    /// Per-dispatch opt-out, evaluated once before the pre phase; a
    /// middleware skipped here is skipped in all three phases of that
    /// dispatch.
    fn should_execute(&self, _ctx: &ExecutionContext) -> bool {
        self.enabled()
    }

    /// Runs before the handler. May replace the context's message to
    /// transform the input. Raising aborts the pre phase and moves the
    /// dispatch to the error phase.
    async fn pre_execute(&self, _ctx: &mut ExecutionContext) -> Result<(), BusError> {
        Ok(())
    }

    /// Runs after the handler with the (possibly already transformed)
    /// result, chaining further transformations.
    async fn post_execute(&self, _ctx: &mut ExecutionContext, result: Reply) -> BusResult {
        Ok(result)
    }

    /// Offered the error raised in any phase. Returning `Some(reply)`
    /// recovers: the reply becomes the dispatch result and no further
    /// error middleware runs. Returning `None` passes the error on.
    async fn on_error(&self, _ctx: &ExecutionContext, _error: &BusError) -> Option<Reply> {
        None
    }
}

// =============================================================================
// FnMiddleware — closure adapter
// =============================================================================

type PreFn = Arc<dyn Fn(&mut ExecutionContext) -> Result<(), BusError> + Send + Sync>;
type PostFn = Arc<dyn Fn(&mut ExecutionContext, Reply) -> BusResult + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ExecutionContext, &BusError) -> Option<Reply> + Send + Sync>;
type ShouldFn = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// Builds a [`Middleware`] from plain closures.
///
/// Useful when a single transform does not warrant a named type:
///
/// ```rust,ignore
/// let stamp = FnMiddleware::new("stamp", 5)
///     .pre(|ctx| {
///         ctx.set_metadata("stamp.seen", serde_json::json!(true));
///         Ok(())
///     });
/// pipeline.add(Arc::new(stamp));
/// ```
pub struct FnMiddleware {
    name: String,
    priority: i32,
    enabled: bool,
    pre: Option<PreFn>,
    post: Option<PostFn>,
    error: Option<ErrorFn>,
    should: Option<ShouldFn>,
}

impl FnMiddleware {
    /// Creates an adapter with no hooks installed.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            pre: None,
            post: None,
            error: None,
            should: None,
        }
    }

    /// Sets the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Installs the pre-execute hook.
    pub fn pre<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ExecutionContext) -> Result<(), BusError> + Send + Sync + 'static,
    {
        self.pre = Some(Arc::new(f));
        self
    }

    /// Installs the post-execute hook.
    pub fn post<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ExecutionContext, Reply) -> BusResult + Send + Sync + 'static,
    {
        self.post = Some(Arc::new(f));
        self
    }

    /// Installs the error hook.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutionContext, &BusError) -> Option<Reply> + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(f));
        self
    }

    /// Installs a custom per-dispatch eligibility check.
    pub fn should_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.should = Some(Arc::new(f));
        self
    }
}

#[async_trait]
impl Middleware for FnMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn should_execute(&self, ctx: &ExecutionContext) -> bool {
        match &self.should {
            Some(f) => self.enabled && f(ctx),
            None => self.enabled,
        }
    }

    async fn pre_execute(&self, ctx: &mut ExecutionContext) -> Result<(), BusError> {
        match &self.pre {
            Some(f) => f(ctx),
            None => Ok(()),
        }
    }

    async fn post_execute(&self, ctx: &mut ExecutionContext, result: Reply) -> BusResult {
        match &self.post {
            Some(f) => f(ctx, result),
            None => Ok(result),
        }
    }

    async fn on_error(&self, ctx: &ExecutionContext, error: &BusError) -> Option<Reply> {
        self.error.as_ref().and_then(|f| f(ctx, error))
    }
}

impl std::fmt::Debug for FnMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}
