//! The key-value store behind the session manager.
//!
//! Entries carry a TTL so sessions orphaned by a dead process expire on
//! their own. The in-process [`MemoryKv`] is the shipped implementation;
//! other backends plug in behind the trait without touching the manager.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use vx_domain::error::Result;

#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value and
    /// resetting the TTL.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Fetch a live value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Live keys with the given prefix.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Startup reachability check.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process store with lazy expiry.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Called opportunistically by the reaper tick.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKv {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read();
        Ok(entries.get(key).and_then(|(value, expires)| {
            if *expires > Instant::now() {
                Some(value.clone())
            } else {
                None
            }
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(key, (_, expires))| key.starts_with(prefix) && *expires > now)
            .map(|(key, _)| key.clone())
            .collect())
    }
}
