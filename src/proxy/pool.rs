//! In-memory rotating set of validated upstream proxies.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::db::ProxyOps;
use crate::error::{Error, Result};

/// A validated upstream endpoint the gateway can dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Upstream {
    pub ip: String,
    pub port: u16,
}

impl Upstream {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Rotating pool of healthy upstreams.
///
/// Many readers (`next`), few writers (validator adds, gateway removals).
/// The round-robin cursor is a single atomic; it indexes modulo the current
/// size, so removals neither skip nor revisit entries within a rotation.
#[derive(Default)]
pub struct ProxyPool {
    entries: RwLock<Vec<Upstream>>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduplicated insert.
    pub fn add_validated(&self, upstream: Upstream) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if !entries.contains(&upstream) {
            entries.push(upstream);
        }
    }

    pub fn remove(&self, upstream: &Upstream) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|u| u != upstream);
    }

    /// Round-robin over the healthy entries. [`Error::PoolEmpty`] when none.
    pub fn next(&self) -> Result<Upstream> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return Err(Error::PoolEmpty);
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % entries.len();
        Ok(entries[idx].clone())
    }

    pub fn size(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Refill from the persistent repository; called once at startup so the
    /// gateway has upstreams before the first validation pass lands.
    pub async fn load_from_store(&self, repo: &ProxyOps<'_>) -> Result<usize> {
        let healthy = repo.list_healthy().await?;
        let mut loaded = 0;
        for proxy in healthy {
            let port = match u16::try_from(proxy.port) {
                Ok(p) => p,
                Err(_) => continue,
            };
            self.add_validated(Upstream {
                ip: proxy.ip,
                port,
            });
            loaded += 1;
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn upstream(n: u16) -> Upstream {
        Upstream {
            ip: format!("10.0.0.{n}"),
            port: 1080,
        }
    }

    #[test]
    fn next_on_empty_pool_errors() {
        let pool = ProxyPool::new();
        assert!(matches!(pool.next(), Err(Error::PoolEmpty)));
    }

    #[test]
    fn add_is_deduplicated() {
        let pool = ProxyPool::new();
        pool.add_validated(upstream(1));
        pool.add_validated(upstream(1));
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn round_robin_is_fair() {
        let pool = ProxyPool::new();
        for n in 1..=4 {
            pool.add_validated(upstream(n));
        }

        let rounds = 5;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..rounds * pool.size() {
            *counts.entry(pool.next().unwrap().addr()).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for (addr, count) in counts {
            assert_eq!(count, rounds, "{addr} should appear exactly {rounds} times");
        }
    }

    #[test]
    fn removal_keeps_rotation_going() {
        let pool = ProxyPool::new();
        for n in 1..=3 {
            pool.add_validated(upstream(n));
        }
        let first = pool.next().unwrap();
        pool.remove(&first);
        assert_eq!(pool.size(), 2);
        // Remaining entries still rotate without a gap.
        let a = pool.next().unwrap();
        let b = pool.next().unwrap();
        assert_ne!(a, b);
        assert_ne!(a, first);
        assert_ne!(b, first);
    }
}
