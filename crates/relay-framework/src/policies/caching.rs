//! Caching middleware.
//!
//! Probes a [`MemoryCache`] in the pre phase and serves the cached reply in
//! the post phase. The handler always runs: on a hit its fresh output is
//! discarded in favor of the cached reply, which keeps handler side effects
//! (audit trails, counters) intact while making the visible result
//! idempotent within the TTL. Fresh replies are stored on a miss.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, trace};

use relay_core::{BoxedMessage, BusError, BusResult, Reply};

use crate::cache::MemoryCache;
use crate::execution::ExecutionContext;
use crate::middleware::Middleware;

/// Default pipeline priority of the caching middleware.
pub const CACHING_PRIORITY: i32 = 30;

type KeyFn = Arc<dyn Fn(&BoxedMessage) -> String + Send + Sync>;
type CacheableFn = Arc<dyn Fn(&BoxedMessage) -> bool + Send + Sync>;

/// Derives the default cache key: a stable hash over the message type name
/// and its canonical field JSON.
pub fn default_cache_key(message: &BoxedMessage) -> String {
    let mut hasher = DefaultHasher::new();
    message.name().hash(&mut hasher);
    // Object keys serialize in sorted order, so equal field maps always
    // produce equal strings.
    message.fields().to_string().hash(&mut hasher);
    format!("{}:{:016x}", message.name(), hasher.finish())
}

/// Per-message-type caching behavior.
#[derive(Clone)]
pub struct CachePolicy {
    ttl: Duration,
    key_fn: Option<KeyFn>,
    tags: Vec<String>,
    cacheable: Option<CacheableFn>,
}

impl CachePolicy {
    /// Creates a policy with the given TTL and default key derivation.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            key_fn: None,
            tags: Vec::new(),
            cacheable: None,
        }
    }

    /// Overrides key derivation.
    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&BoxedMessage) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }

    /// Adds an invalidation tag to every entry stored under this policy.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Restricts caching to messages the predicate accepts. Rejected
    /// messages bypass the middleware entirely for that dispatch.
    pub fn cacheable<F>(mut self, f: F) -> Self
    where
        F: Fn(&BoxedMessage) -> bool + Send + Sync + 'static,
    {
        self.cacheable = Some(Arc::new(f));
        self
    }

    fn key_for(&self, message: &BoxedMessage) -> String {
        match &self.key_fn {
            Some(f) => f(message),
            None => default_cache_key(message),
        }
    }

    fn accepts(&self, message: &BoxedMessage) -> bool {
        self.cacheable.as_ref().is_none_or(|f| f(message))
    }
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("ttl", &self.ttl)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Middleware serving repeated dispatches from a [`MemoryCache`].
pub struct CachingMiddleware {
    priority: i32,
    cache: Arc<MemoryCache>,
    policies: RwLock<HashMap<String, CachePolicy>>,
}

impl CachingMiddleware {
    /// Creates a middleware over a fresh cache at the default priority.
    pub fn new() -> Self {
        Self::with_cache(Arc::new(MemoryCache::new()), CACHING_PRIORITY)
    }

    /// Creates a middleware over a shared cache at an explicit priority.
    pub fn with_cache(cache: Arc<MemoryCache>, priority: i32) -> Self {
        Self {
            priority,
            cache,
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Enables caching for a message type.
    pub fn policy(self, message_type: impl Into<String>, policy: CachePolicy) -> Self {
        self.policies.write().insert(message_type.into(), policy);
        self
    }

    /// The backing cache, for direct invalidation.
    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    fn policy_for(&self, message: &BoxedMessage) -> Option<CachePolicy> {
        self.policies.read().get(message.name()).cloned()
    }
}

impl Default for CachingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for CachingMiddleware {
    fn name(&self) -> &str {
        "caching"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_execute(&self, ctx: &ExecutionContext) -> bool {
        match self.policy_for(ctx.message()) {
            Some(policy) => policy.accepts(ctx.message()),
            None => false,
        }
    }

    async fn pre_execute(&self, ctx: &mut ExecutionContext) -> Result<(), BusError> {
        let Some(policy) = self.policy_for(ctx.message()) else {
            return Ok(());
        };
        let key = policy.key_for(ctx.message());
        let cached = self.cache.get(&key);
        let hit = cached.is_some();
        trace!(key = %key, hit, "Cache probed");

        ctx.set_metadata("cache.key", json!(key));
        ctx.set_metadata("cache.hit", json!(hit));
        if let Some(reply) = cached {
            // Wrapped in an array so an empty reply stays distinguishable
            // from no recorded value.
            ctx.set_metadata("cache.value", json!(reply.into_iter().collect::<Vec<_>>()));
        }
        Ok(())
    }

    async fn post_execute(&self, ctx: &mut ExecutionContext, result: Reply) -> BusResult {
        let Some(policy) = self.policy_for(ctx.message()) else {
            return Ok(result);
        };
        let Some(key) = ctx.metadata("cache.key").and_then(|v| v.as_str()) else {
            return Ok(result);
        };
        let key = key.to_string();

        // Serve the reply captured at probe time.
        if let Some(cached) = ctx.metadata("cache.value").and_then(|v| v.as_array()) {
            debug!(key = %key, "Serving cached reply");
            return Ok(cached.first().cloned());
        }

        self.cache.put(&key, result.clone(), policy.ttl, &policy.tags);
        debug!(key = %key, ttl_ms = policy.ttl.as_millis() as u64, "Reply cached");
        Ok(result)
    }
}

impl std::fmt::Debug for CachingMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingMiddleware")
            .field("priority", &self.priority)
            .field("policies", &self.policies.read().len())
            .field("entries", &self.cache.len())
            .finish()
    }
}
