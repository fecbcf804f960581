//! Short-TTL read cache for hot API endpoints.
//!
//! The read path depends only on the [`Cache`] capability; a no-op variant
//! satisfies the same interface for deployments that don't want caching.
//! Cache failures never fail a request — handlers fall through to direct
//! reads.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

/// TTLs per key family, matching how quickly each surface is allowed to go
/// stale.
pub const JOBS_LIST_TTL: Duration = Duration::from_secs(60);
pub const STATS_TTL: Duration = Duration::from_secs(30);
pub const RESULTS_LIST_TTL: Duration = Duration::from_secs(60);
pub const DETAIL_TTL: Duration = Duration::from_secs(120);

/// Read-through cache capability.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Remove every key matching `pattern`, where a trailing `*` matches any
    /// suffix. Write endpoints purge only their own key family.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// In-process cache over a concurrent map with lazy expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (serde_json::Value, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires) = entry.value();
            if Instant::now() < *expires {
                return Ok(Some(value.clone()));
            }
        }
        // Expired entries are dropped on the next read rather than swept.
        self.entries
            .remove_if(key, |_, entry| Instant::now() >= entry.1);
        Ok(None)
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_owned(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<()> {
        match pattern.strip_suffix('*') {
            Some(prefix) => self.entries.retain(|k, _| !k.starts_with(prefix)),
            None => {
                self.entries.remove(pattern);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Cache that stores nothing. Every read misses; every write succeeds.
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set("jobs:list:0:50", json!([1, 2, 3]), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("jobs:list:0:50").await.unwrap(),
            Some(json!([1, 2, 3]))
        );
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = MemoryCache::new();
        cache
            .set("stats", json!({}), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("stats").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pattern_delete_only_touches_family() {
        let cache = MemoryCache::new();
        cache
            .set("jobs:list:0", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("jobs:detail:a", json!(2), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("stats", json!(3), Duration::from_secs(60))
            .await
            .unwrap();

        cache.delete_by_pattern("jobs:*").await.unwrap();

        assert_eq!(cache.get("jobs:list:0").await.unwrap(), None);
        assert_eq!(cache.get("jobs:detail:a").await.unwrap(), None);
        assert_eq!(cache.get("stats").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn noop_always_misses() {
        let cache = NoopCache;
        cache
            .set("anything", json!(true), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("anything").await.unwrap(), None);
    }
}
