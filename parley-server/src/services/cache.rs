//! The cache collaborator with tag-based invalidation.
//!
//! Writers register every key under a logical group tag; invalidating the
//! tag removes every key in the group in one call, so write sites never need
//! to know which derived views exist.

use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]);
    async fn get(&self, key: &str) -> Option<Value>;
    async fn remove(&self, key: &str);
    /// Removes every key registered under the tag.
    async fn invalidate_tag(&self, tag: &str);
}

/// Single-process cache: key/value map with TTL plus a tag-to-keys index.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Entry>,
    tags: HashMap<String, HashSet<String>>,
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) {
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        for tag in tags {
            inner
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    async fn get(&self, key: &str) -> Option<Value> {
        {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict lazily.
        self.inner.write().await.entries.remove(key);
        None
    }

    async fn remove(&self, key: &str) {
        self.inner.write().await.entries.remove(key);
    }

    async fn invalidate_tag(&self, tag: &str) {
        let mut inner = self.inner.write().await;
        if let Some(keys) = inner.tags.remove(tag) {
            for key in keys {
                inner.entries.remove(&key);
            }
        }
    }
}
