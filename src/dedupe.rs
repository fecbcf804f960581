//! Shared "have I seen this place?" set with a TTL.
//!
//! Workers consult this before processing a place id or URL so the same
//! listing is only extracted once across the fleet within the TTL window.
//! The redis variant is the production one; the in-memory variant covers
//! single-worker and test setups.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use crate::error::Result;

/// Default retention for dedupe keys.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const KEY_PREFIX: &str = "dedupe:";

/// Duplicate-suppression set.
#[async_trait]
pub trait Deduper: Send + Sync {
    /// Atomically record `key`, returning whether it was new. Exactly one
    /// caller per TTL window observes `true` for a given key.
    async fn add_if_absent(&self, key: &str) -> Result<bool>;

    /// Whether `key` is currently recorded (without recording it).
    async fn seen(&self, key: &str) -> Result<bool>;
}

/// In-process deduper backed by a concurrent map with lazy expiry.
pub struct MemoryDeduper {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl MemoryDeduper {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

impl Default for MemoryDeduper {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl Deduper for MemoryDeduper {
    async fn add_if_absent(&self, key: &str) -> Result<bool> {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        // The entry API holds the shard lock, making check-and-set atomic
        // across concurrent callers of the same key.
        match self.entries.entry(key.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) > self.ttl {
                    slot.insert(now);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn seen(&self, key: &str) -> Result<bool> {
        match self.entries.get(key) {
            Some(entry) => Ok(entry.elapsed() <= self.ttl),
            None => Ok(false),
        }
    }
}

/// Fleet-wide deduper over redis `SET NX EX`.
///
/// Redis being down must never stall scraping: errors degrade to treating
/// the key as new, accepting duplicate work that the idempotent result
/// upserts absorb downstream.
#[derive(Clone)]
pub struct RedisDeduper {
    conn: redis::aio::ConnectionManager,
    ttl: Duration,
}

impl RedisDeduper {
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| anyhow::anyhow!("redis url: {e}"))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("redis connect: {e}"))?;
        Ok(Self { conn, ttl })
    }
}

#[async_trait]
impl Deduper for RedisDeduper {
    async fn add_if_absent(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(format!("{KEY_PREFIX}{key}"))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await;
        match reply {
            // SET NX returns OK when the key was absent, nil otherwise.
            Ok(set) => Ok(set.is_some()),
            Err(e) => {
                warn!(error = %e, "dedupe store unreachable, treating key as new");
                Ok(true)
            }
        }
    }

    async fn seen(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: redis::RedisResult<bool> = redis::cmd("EXISTS")
            .arg(format!("{KEY_PREFIX}{key}"))
            .query_async(&mut conn)
            .await;
        match reply {
            Ok(exists) => Ok(exists),
            Err(e) => {
                warn!(error = %e, "dedupe store unreachable, reporting unseen");
                Ok(false)
            }
        }
    }
}
