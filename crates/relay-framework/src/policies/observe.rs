//! Dispatch observability middleware.
//!
//! Outermost policy (priority 0 by default) emitting structured events for
//! every dispatch: entry, exit with elapsed time, and failure. It never
//! recovers from errors, only records them.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};

use relay_core::{BusError, BusResult, Reply};

use crate::execution::ExecutionContext;
use crate::middleware::Middleware;

/// Default pipeline priority of the tracing middleware.
pub const TRACING_PRIORITY: i32 = 0;

/// Emits entry/exit/error events around every dispatch.
#[derive(Debug)]
pub struct TracingMiddleware {
    priority: i32,
}

impl TracingMiddleware {
    /// Creates the middleware at the default (outermost) priority.
    pub fn new() -> Self {
        Self::with_priority(TRACING_PRIORITY)
    }

    /// Creates the middleware at an explicit priority.
    pub fn with_priority(priority: i32) -> Self {
        Self { priority }
    }
}

impl Default for TracingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn pre_execute(&self, ctx: &mut ExecutionContext) -> Result<(), BusError> {
        debug!(
            execution_id = ctx.execution_id(),
            message = ctx.message().name(),
            "Dispatch started"
        );
        Ok(())
    }

    async fn post_execute(&self, ctx: &mut ExecutionContext, result: Reply) -> BusResult {
        let elapsed_us = ctx.elapsed().as_micros() as u64;
        debug!(
            execution_id = ctx.execution_id(),
            message = ctx.message().name(),
            elapsed_us,
            replied = result.is_some(),
            "Dispatch finished"
        );
        ctx.set_metadata("tracing.elapsed_us", json!(elapsed_us));
        Ok(result)
    }

    async fn on_error(&self, ctx: &ExecutionContext, err: &BusError) -> Option<Reply> {
        error!(
            execution_id = ctx.execution_id(),
            message = ctx.message().name(),
            elapsed_us = ctx.elapsed().as_micros() as u64,
            kind = err.kind(),
            error = %err,
            "Dispatch failed"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{BoxedMessage, ContextMap, impl_message};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Ping;
    impl_message!(Ping);

    #[tokio::test]
    async fn records_elapsed_time_and_never_recovers() {
        let middleware = TracingMiddleware::new();
        let mut ctx = ExecutionContext::new(BoxedMessage::new(Ping), ContextMap::new());

        middleware.pre_execute(&mut ctx).await.unwrap();
        middleware.post_execute(&mut ctx, None).await.unwrap();
        assert!(ctx.metadata("tracing.elapsed_us").is_some());

        let err = BusError::UnknownMessage { name: "Ping".into() };
        assert!(middleware.on_error(&ctx, &err).await.is_none());
    }
}
