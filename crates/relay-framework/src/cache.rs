//! In-memory reply cache with tag-based invalidation.
//!
//! Backing store for the caching middleware. Entries expire lazily: a
//! lookup past the deadline removes the entry and reports a miss, so no
//! background task is needed.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use tracing::trace;

use relay_core::Reply;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Reply,
    expires_at: Instant,
    created_at: SystemTime,
}

/// A thread-safe reply cache keyed by opaque strings, with a secondary
/// tag index for group invalidation.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    tags: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a live entry, evicting it first if it expired.
    pub fn get(&self, key: &str) -> Option<Reply> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: take the write lock and evict.
        trace!(key, "Evicting expired cache entry");
        self.entries.write().remove(key);
        None
    }

    /// Stores a reply under `key` for `ttl`, indexed under `tags`.
    pub fn put(&self, key: impl Into<String>, value: Reply, ttl: Duration, tags: &[String]) {
        let key = key.into();
        for tag in tags {
            self.tags
                .write()
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.write().insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                created_at: SystemTime::now(),
            },
        );
    }

    /// Removes a single entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Removes every entry indexed under `tag`. Returns how many were live.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let Some(keys) = self.tags.write().remove(tag) else {
            return 0;
        };
        let mut entries = self.entries.write();
        keys.iter().filter(|key| entries.remove(*key).is_some()).count()
    }

    /// Drops all entries and the tag index.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.tags.write().clear();
    }

    /// Number of stored entries, counting not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Wall-clock creation time of a stored entry.
    pub fn created_at(&self, key: &str) -> Option<SystemTime> {
        self.entries.read().get(key).map(|e| e.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn put_get_round_trip() {
        let cache = MemoryCache::new();
        cache.put("k1", Some(json!({ "n": 1 })), TTL, &[]);
        assert_eq!(cache.get("k1"), Some(Some(json!({ "n": 1 }))));
        assert_eq!(cache.get("k2"), None);
    }

    #[test]
    fn none_reply_is_a_cacheable_value() {
        let cache = MemoryCache::new();
        cache.put("empty", None, TTL, &[]);
        // Outer Some: the key exists; inner None: the handler replied nothing.
        assert_eq!(cache.get("empty"), Some(None));
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = MemoryCache::new();
        cache.put("k", Some(json!(1)), Duration::ZERO, &[]);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn tag_invalidation_removes_the_group() {
        let cache = MemoryCache::new();
        cache.put("a", Some(json!(1)), TTL, &["orders".into()]);
        cache.put("b", Some(json!(2)), TTL, &["orders".into(), "reports".into()]);
        cache.put("c", Some(json!(3)), TTL, &["reports".into()]);

        assert_eq!(cache.invalidate_tag("orders"), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(Some(json!(3))));
        assert_eq!(cache.invalidate_tag("orders"), 0);
    }

    #[test]
    fn invalidate_single_key() {
        let cache = MemoryCache::new();
        cache.put("k", Some(json!(1)), TTL, &[]);
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
    }
}
