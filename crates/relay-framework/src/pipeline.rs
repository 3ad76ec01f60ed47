//! The middleware pipeline.
//!
//! The pipeline owns an ordered chain of [`Middleware`] and wraps every
//! dispatch in their pre/post/error hooks. Ordering is by ascending
//! priority in the pre phase and the exact reverse in the post and error
//! phases; the sort is stable, so middleware with equal priorities keep
//! insertion order. The sorted view is recomputed lazily whenever
//! membership changes.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use relay_core::{BoxedMessage, BusError, BusResult, ContextMap};

use crate::execution::{ExecutionContext, Phase};
use crate::middleware::Middleware;

/// The function the pipeline wraps: resolves and runs the actual handler.
pub type Executor = Arc<dyn Fn(BoxedMessage) -> BoxFuture<'static, BusResult> + Send + Sync>;

struct PipelineInner {
    entries: Vec<Arc<dyn Middleware>>,
    sorted: bool,
}

/// An ordered chain of middleware wrapping every dispatch.
pub struct Pipeline {
    inner: RwLock<PipelineInner>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PipelineInner {
                entries: Vec::new(),
                sorted: true,
            }),
        }
    }

    /// Appends a middleware and invalidates the cached sort order.
    pub fn add(&self, middleware: Arc<dyn Middleware>) {
        let mut inner = self.inner.write();
        debug!(
            middleware = middleware.name(),
            priority = middleware.priority(),
            "Middleware added"
        );
        inner.entries.push(middleware);
        inner.sorted = false;
    }

    /// Number of registered middleware (enabled or not).
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the pipeline has no middleware.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Registered middleware names in current execution order.
    pub fn names(&self) -> Vec<String> {
        self.sorted_entries()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Returns the entries sorted ascending by priority, resorting lazily
    /// if membership changed since the last dispatch.
    fn sorted_entries(&self) -> Vec<Arc<dyn Middleware>> {
        {
            let inner = self.inner.read();
            if inner.sorted {
                return inner.entries.clone();
            }
        }
        let mut inner = self.inner.write();
        if !inner.sorted {
            // Stable: insertion order is preserved for equal priorities.
            inner.entries.sort_by_key(|m| m.priority());
            inner.sorted = true;
        }
        inner.entries.clone()
    }

    /// Runs one dispatch through the chain.
    ///
    /// Builds a fresh [`ExecutionContext`], runs eligible middleware
    /// ascending in the pre phase, the executor, then the middleware
    /// descending in the post phase. Any error moves the dispatch to the
    /// error phase, where middleware run descending until one returns a
    /// recovery reply; if none does, the original error propagates.
    pub async fn execute(
        &self,
        message: BoxedMessage,
        scope: ContextMap,
        executor: Executor,
    ) -> BusResult {
        let chain = self.sorted_entries();
        let mut ctx = ExecutionContext::new(message, scope);

        // Eligibility is decided once so a middleware skipped in the pre
        // phase is also skipped in the post and error phases.
        let eligible: Vec<Arc<dyn Middleware>> = chain
            .into_iter()
            .filter(|m| m.should_execute(&ctx))
            .collect();

        trace!(
            execution_id = ctx.execution_id(),
            message = ctx.message().name(),
            middleware = eligible.len(),
            "Pipeline dispatch started"
        );

        ctx.set_phase(Phase::Pre);
        for middleware in &eligible {
            trace!(middleware = middleware.name(), "pre_execute");
            if let Err(err) = middleware.pre_execute(&mut ctx).await {
                return self.error_phase(&eligible, &mut ctx, err).await;
            }
        }

        ctx.set_phase(Phase::Main);
        let mut result = match executor(ctx.message().clone()).await {
            Ok(reply) => reply,
            Err(err) => return self.error_phase(&eligible, &mut ctx, err).await,
        };

        ctx.set_phase(Phase::Post);
        for middleware in eligible.iter().rev() {
            trace!(middleware = middleware.name(), "post_execute");
            match middleware.post_execute(&mut ctx, result).await {
                Ok(reply) => result = reply,
                Err(err) => return self.error_phase(&eligible, &mut ctx, err).await,
            }
        }

        ctx.set_phase(Phase::Done);
        Ok(result)
    }

    async fn error_phase(
        &self,
        eligible: &[Arc<dyn Middleware>],
        ctx: &mut ExecutionContext,
        error: BusError,
    ) -> BusResult {
        ctx.set_phase(Phase::Error);
        warn!(
            execution_id = ctx.execution_id(),
            message = ctx.message().name(),
            error = %error,
            "Dispatch entered error phase"
        );

        for middleware in eligible.iter().rev() {
            if let Some(recovery) = middleware.on_error(ctx, &error).await {
                debug!(
                    middleware = middleware.name(),
                    "Middleware recovered from error"
                );
                return Ok(recovery);
            }
        }
        Err(error)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::FnMiddleware;
    use parking_lot::Mutex;
    use relay_core::{Reply, impl_message};
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Probe {
        n: i64,
    }
    impl_message!(Probe);

    #[derive(Serialize)]
    struct Normalized {
        n: i64,
    }
    impl_message!(Normalized);

    fn ok_executor(reply: Reply) -> Executor {
        Arc::new(move |_msg| {
            let reply = reply.clone();
            Box::pin(async move { Ok(reply) })
        })
    }

    fn failing_executor() -> Executor {
        Arc::new(|_msg| {
            Box::pin(async { Err(BusError::failure(std::io::Error::other("handler blew up"))) })
        })
    }

    /// Records pre/post/error invocations into a shared trace.
    fn recording(name: &'static str, priority: i32, log: Arc<Mutex<Vec<String>>>) -> FnMiddleware {
        let pre_log = Arc::clone(&log);
        let post_log = Arc::clone(&log);
        let err_log = log;
        FnMiddleware::new(name, priority)
            .pre(move |_ctx| {
                pre_log.lock().push(format!("pre:{name}"));
                Ok(())
            })
            .post(move |_ctx, result| {
                post_log.lock().push(format!("post:{name}"));
                Ok(result)
            })
            .on_error(move |_ctx, _err| {
                err_log.lock().push(format!("err:{name}"));
                None
            })
    }

    #[tokio::test]
    async fn pre_ascending_post_descending() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        // Added out of order on purpose.
        pipeline.add(Arc::new(recording("c30", 30, Arc::clone(&log))));
        pipeline.add(Arc::new(recording("a10", 10, Arc::clone(&log))));
        pipeline.add(Arc::new(recording("b20", 20, Arc::clone(&log))));

        pipeline
            .execute(
                BoxedMessage::new(Probe { n: 1 }),
                ContextMap::new(),
                ok_executor(None),
            )
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "pre:a10", "pre:b20", "pre:c30", //
                "post:c30", "post:b20", "post:a10",
            ]
        );
    }

    #[tokio::test]
    async fn equal_priorities_keep_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(recording("first", 10, Arc::clone(&log))));
        pipeline.add(Arc::new(recording("second", 10, Arc::clone(&log))));

        pipeline
            .execute(
                BoxedMessage::new(Probe { n: 1 }),
                ContextMap::new(),
                ok_executor(None),
            )
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["pre:first", "pre:second", "post:second", "post:first"]
        );
    }

    #[tokio::test]
    async fn pre_hook_can_replace_the_message() {
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(FnMiddleware::new("normalize", 10).pre(|ctx| {
            let n = ctx.message().downcast_ref::<Probe>().unwrap().n.abs();
            ctx.set_message(BoxedMessage::new(Normalized { n }));
            Ok(())
        })));

        let executor: Executor = Arc::new(|msg| {
            Box::pin(async move {
                assert_eq!(msg.name(), "Normalized");
                let n = msg.downcast_ref::<Normalized>().unwrap().n;
                Ok(Some(json!({ "n": n })))
            })
        });

        let reply = pipeline
            .execute(BoxedMessage::new(Probe { n: -5 }), ContextMap::new(), executor)
            .await
            .unwrap();
        assert_eq!(reply, Some(json!({ "n": 5 })));
    }

    #[tokio::test]
    async fn post_hooks_chain_result_transformations() {
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(FnMiddleware::new("outer", 10).post(
            |_ctx, result| {
                let mut v = result.unwrap();
                v["tags"].as_array_mut().unwrap().push(json!("outer"));
                Ok(Some(v))
            },
        )));
        pipeline.add(Arc::new(FnMiddleware::new("inner", 20).post(
            |_ctx, result| {
                let mut v = result.unwrap();
                v["tags"].as_array_mut().unwrap().push(json!("inner"));
                Ok(Some(v))
            },
        )));

        let reply = pipeline
            .execute(
                BoxedMessage::new(Probe { n: 1 }),
                ContextMap::new(),
                ok_executor(Some(json!({ "tags": [] }))),
            )
            .await
            .unwrap()
            .unwrap();
        // Inner (higher priority value) transforms first, outer sees the final output last.
        assert_eq!(reply["tags"], json!(["inner", "outer"]));
    }

    #[tokio::test]
    async fn first_recovery_short_circuits_error_phase() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(recording("outer", 10, Arc::clone(&log))));
        let recover_log = Arc::clone(&log);
        pipeline.add(Arc::new(
            FnMiddleware::new("recoverer", 20).on_error(move |_ctx, _err| {
                recover_log.lock().push("err:recoverer".into());
                Some(Some(json!({ "fallback": true })))
            }),
        ));

        let reply = pipeline
            .execute(
                BoxedMessage::new(Probe { n: 1 }),
                ContextMap::new(),
                failing_executor(),
            )
            .await
            .unwrap();
        assert_eq!(reply, Some(json!({ "fallback": true })));
        // Descending order: the recoverer (priority 20) ran first and the
        // outer middleware's error hook never did.
        assert_eq!(*log.lock(), vec!["pre:outer", "err:recoverer"]);
    }

    #[tokio::test]
    async fn unrecovered_error_propagates_original() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(recording("a", 10, Arc::clone(&log))));
        pipeline.add(Arc::new(recording("b", 20, Arc::clone(&log))));

        let err = pipeline
            .execute(
                BoxedMessage::new(Probe { n: 1 }),
                ContextMap::new(),
                failing_executor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Failure(_)));
        assert_eq!(*log.lock(), vec!["pre:a", "pre:b", "err:b", "err:a"]);
    }

    #[tokio::test]
    async fn pre_failure_aborts_remaining_pre_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        let pre_log = Arc::clone(&log);
        pipeline.add(Arc::new(FnMiddleware::new("gate", 10).pre(move |_ctx| {
            pre_log.lock().push("pre:gate".into());
            Err(BusError::failure(std::io::Error::other("rejected")))
        })));
        pipeline.add(Arc::new(recording("later", 20, Arc::clone(&log))));

        let err = pipeline
            .execute(
                BoxedMessage::new(Probe { n: 1 }),
                ContextMap::new(),
                ok_executor(None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Failure(_)));
        // "later" never ran pre, and (being eligible) was offered the error.
        assert_eq!(*log.lock(), vec!["pre:gate", "err:later"]);
    }

    #[tokio::test]
    async fn skipped_middleware_skips_all_phases() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(
            recording("sleeper", 10, Arc::clone(&log)).enabled(false),
        ));
        pipeline.add(Arc::new(recording("active", 20, Arc::clone(&log))));

        pipeline
            .execute(
                BoxedMessage::new(Probe { n: 1 }),
                ContextMap::new(),
                ok_executor(None),
            )
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["pre:active", "post:active"]);
    }

    #[tokio::test]
    async fn membership_change_resorts_lazily() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(recording("b20", 20, Arc::clone(&log))));
        assert_eq!(pipeline.names(), vec!["b20"]);

        pipeline.add(Arc::new(recording("a10", 10, Arc::clone(&log))));
        assert_eq!(pipeline.names(), vec!["a10", "b20"]);
    }
}
