//! Per-dispatch execution context.
//!
//! One [`ExecutionContext`] is created for each top-level dispatch through
//! the pipeline and lives only for that dispatch, including its error
//! handling. It carries the current (replaceable) message, a metadata map
//! middleware use as scratch space, a generated execution id, timing
//! information, and a snapshot of the propagated context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use relay_core::{BoxedMessage, ContextMap};

static EXECUTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Pipeline phase of a dispatch.
///
/// ```text
/// Created → Pre → Main → Post → Done
///              ╲     │     ╱
///               └─ Error ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Context built, nothing executed yet.
    Created,
    /// Middleware `pre_execute` hooks are running (ascending priority).
    Pre,
    /// The resolved handler is running.
    Main,
    /// Middleware `post_execute` hooks are running (descending priority).
    Post,
    /// Dispatch finished without an unrecovered error.
    Done,
    /// Middleware `on_error` hooks are running (descending priority).
    Error,
}

/// Mutable per-dispatch state threaded through the middleware pipeline.
#[derive(Debug)]
pub struct ExecutionContext {
    message: BoxedMessage,
    /// Middleware scratch space. Keys are conventionally prefixed with the
    /// owning middleware's name, e.g. `cache.hit`, `validation.errors`.
    pub metadata: HashMap<String, Value>,
    execution_id: String,
    started_at: Instant,
    started_wall: SystemTime,
    scope: ContextMap,
    phase: Phase,
}

impl ExecutionContext {
    /// Creates a fresh context for one dispatch.
    pub fn new(message: BoxedMessage, scope: ContextMap) -> Self {
        let seq = EXECUTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now();
        let nanos = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        Self {
            message,
            metadata: HashMap::new(),
            execution_id: format!("exec-{seq:08x}-{nanos:08x}"),
            started_at: Instant::now(),
            started_wall: now,
            scope,
            phase: Phase::Created,
        }
    }

    /// The message currently being dispatched.
    pub fn message(&self) -> &BoxedMessage {
        &self.message
    }

    /// Replaces the message.
    ///
    /// This is how a `pre_execute` hook transforms input: it installs a new
    /// (possibly differently typed) message instance; the original is never
    /// mutated.
    pub fn set_message(&mut self, message: BoxedMessage) {
        self.message = message;
    }

    /// The generated execution identifier.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Monotonic time elapsed since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Wall-clock start timestamp.
    pub fn started_at(&self) -> SystemTime {
        self.started_wall
    }

    /// The propagated-context attributes active for this dispatch.
    pub fn scope(&self) -> &ContextMap {
        &self.scope
    }

    /// The current pipeline phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Stores a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Reads a metadata entry.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::impl_message;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Probe;
    impl_message!(Probe);

    #[test]
    fn fresh_context_starts_created_with_unique_id() {
        let a = ExecutionContext::new(BoxedMessage::new(Probe), ContextMap::new());
        let b = ExecutionContext::new(BoxedMessage::new(Probe), ContextMap::new());
        assert_eq!(a.phase(), Phase::Created);
        assert_ne!(a.execution_id(), b.execution_id());
    }

    #[test]
    fn metadata_round_trip() {
        let mut ctx = ExecutionContext::new(BoxedMessage::new(Probe), ContextMap::new());
        ctx.set_metadata("cache.hit", serde_json::json!(true));
        assert_eq!(ctx.metadata("cache.hit"), Some(&serde_json::json!(true)));
        assert_eq!(ctx.metadata("cache.key"), None);
    }
}
