//! Propagated context scopes.
//!
//! A [`ScopeStack`] carries caller-supplied metadata (correlation id, user
//! id, tenant, ...) that must be visible to every handler invoked while a
//! scope is active. Scopes nest with override-on-enter and restore-on-exit
//! semantics: entering merges new attributes over the parent mapping (new
//! keys win), and dropping the guard restores exactly the state captured at
//! entry, no matter what happened inside.
//!
//! # Isolation
//!
//! A `ScopeStack` is an owned value, created per logical call chain. There
//! is deliberately no ambient global: two concurrent chains each hold their
//! own stack and can never observe each other's attributes. The RAII
//! [`Scope`] guard borrows the stack mutably, so entering the same handle
//! twice concurrently or exiting out of order is rejected by the borrow
//! checker rather than failing at runtime.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A primitive-ish attribute value carried in a scope.
///
/// Restricting values to primitives keeps serialization and error
/// enrichment well-defined; structured data belongs in messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// A string attribute.
    String(String),
    /// A signed integer attribute.
    Integer(i64),
    /// A floating-point attribute.
    Float(f64),
    /// A boolean attribute.
    Bool(bool),
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl ContextValue {
    /// Converts to a JSON value for metadata and snapshots.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::Bool(*b),
        }
    }
}

/// The active attribute mapping of a scope.
pub type ContextMap = HashMap<String, ContextValue>;

/// Builds a [`ContextMap`] from `"key" => value` pairs.
#[macro_export]
macro_rules! context_map {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::ContextMap::new();
        $(map.insert($key.to_string(), $crate::ContextValue::from($value));)*
        map
    }};
}

// =============================================================================
// ScopeStack and Scope guard
// =============================================================================

/// A per-call-chain stack of propagated context frames.
///
/// # Example
///
/// ```rust,ignore
/// let mut stack = ScopeStack::new();
/// let mut outer = stack.enter(context_map! { "tenant" => "acme" });
/// {
///     let inner = outer.enter(context_map! { "request_id" => "r-42" });
///     bus.execute_with(msg, inner.active()).await?;
/// } // inner frame restored here
/// assert!(outer.active().contains_key("tenant"));
/// ```
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<ContextMap>,
}

impl ScopeStack {
    /// Creates a stack with an empty root frame.
    pub fn new() -> Self {
        Self {
            frames: vec![ContextMap::new()],
        }
    }

    /// The currently active (merged) attribute mapping.
    pub fn active(&self) -> &ContextMap {
        // The root frame is never popped.
        self.frames.last().expect("scope stack has a root frame")
    }

    /// Enters a scope, installing `parent ∪ attrs` as the active mapping.
    ///
    /// New keys win on conflict. The returned guard restores the parent
    /// mapping when dropped.
    pub fn enter(&mut self, attrs: ContextMap) -> Scope<'_> {
        push_merged(&mut self.frames, attrs);
        Scope {
            frames: &mut self.frames,
        }
    }

    /// Clones the active mapping.
    pub fn snapshot(&self) -> ContextMap {
        self.active().clone()
    }

    /// Current nesting depth (0 = no scope entered).
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }
}

fn push_merged(frames: &mut Vec<ContextMap>, attrs: ContextMap) {
    let mut merged = frames.last().cloned().unwrap_or_default();
    merged.extend(attrs);
    frames.push(merged);
}

/// RAII guard for an entered scope.
///
/// Dropping the guard pops the frame it pushed, restoring the parent
/// mapping. Nested scopes are created with [`Scope::enter`], which borrows
/// this guard mutably for the lifetime of the inner scope.
#[derive(Debug)]
pub struct Scope<'a> {
    frames: &'a mut Vec<ContextMap>,
}

impl Scope<'_> {
    /// The currently active (merged) attribute mapping.
    pub fn active(&self) -> &ContextMap {
        self.frames.last().expect("scope stack has a root frame")
    }

    /// Enters a nested scope merged over this one.
    pub fn enter(&mut self, attrs: ContextMap) -> Scope<'_> {
        push_merged(self.frames, attrs);
        Scope {
            frames: self.frames,
        }
    }

    /// Clones the active mapping.
    pub fn snapshot(&self) -> ContextMap {
        self.active().clone()
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        self.frames.pop();
    }
}

// =============================================================================
// ContextSnapshot
// =============================================================================

/// Propagated attributes captured when an error escaped an active scope.
///
/// Carried by [`BusError::Enriched`](crate::BusError::Enriched) as a typed
/// envelope rather than mutating the original error.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    /// The full active mapping at the time of failure.
    pub attributes: ContextMap,
    /// When the snapshot was taken.
    pub captured_at: SystemTime,
    /// Short classifier of the escaping error.
    pub error_kind: String,
}

impl ContextSnapshot {
    /// Captures the given attributes together with the current time.
    pub fn capture(attributes: &ContextMap, error_kind: impl Into<String>) -> Self {
        Self {
            attributes: attributes.clone(),
            captured_at: SystemTime::now(),
            error_kind: error_kind.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_merges_with_override() {
        let mut stack = ScopeStack::new();
        let mut outer = stack.enter(context_map! { "a" => 1i64, "tenant" => "acme" });
        assert_eq!(outer.active()["a"], ContextValue::Integer(1));

        let inner = outer.enter(context_map! { "a" => 2i64, "b" => 3i64 });
        assert_eq!(inner.active()["a"], ContextValue::Integer(2));
        assert_eq!(inner.active()["b"], ContextValue::Integer(3));
        assert_eq!(inner.active()["tenant"], ContextValue::String("acme".into()));
    }

    #[test]
    fn exit_restores_parent_exactly() {
        let mut stack = ScopeStack::new();
        let mut outer = stack.enter(context_map! { "a" => 1i64 });
        {
            let _inner = outer.enter(context_map! { "a" => 2i64, "b" => 3i64 });
        }
        assert_eq!(outer.active().len(), 1);
        assert_eq!(outer.active()["a"], ContextValue::Integer(1));
        drop(outer);
        assert!(stack.active().is_empty());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn restoration_survives_early_exit() {
        let mut stack = ScopeStack::new();
        let result: Result<(), &str> = (|| {
            let _scope = stack.enter(context_map! { "request_id" => "r-1" });
            Err("handler failed")
        })();
        assert!(result.is_err());
        // The guard dropped on the error path; the root frame is back.
        assert!(stack.active().is_empty());
    }

    #[test]
    fn snapshot_captures_active_mapping() {
        let mut stack = ScopeStack::new();
        let scope = stack.enter(context_map! { "user" => "U1" });
        let snapshot = ContextSnapshot::capture(scope.active(), "failure");
        assert_eq!(snapshot.attributes["user"], ContextValue::String("U1".into()));
        assert_eq!(snapshot.error_kind, "failure");
    }
}
