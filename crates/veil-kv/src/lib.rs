//! Ephemeral key-value store for OTP codes, cooldown flags, and attempt
//! counters. TTL expiry is an approximate sliding window: entries are
//! dropped lazily on read and swept by a background loop.

pub mod keys;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Clone)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process TTL store. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct TtlStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl TtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        let mut map = self.inner.lock().expect("kv lock poisoned");
        let now = Instant::now();
        match map.get(key) {
            Some(entry) if entry.expired(now) => {
                map.remove(key);
                None
            }
            Some(entry) => Some(entry.value),
            None => None,
        }
    }

    pub fn set_ex(&self, key: &str, ttl: Duration, value: i64) {
        let mut map = self.inner.lock().expect("kv lock poisoned");
        map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Atomic increment-then-return, creating the key at 1. A fresh key has
    /// no TTL until `expire` is called, mirroring Redis INCR semantics.
    /// Holding the lock across read-modify-write is what closes the
    /// check-then-act race on attempt counters.
    pub fn incr(&self, key: &str) -> i64 {
        let mut map = self.inner.lock().expect("kv lock poisoned");
        let now = Instant::now();
        let entry = map.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });
        if entry.expired(now) {
            entry.value = 0;
            entry.expires_at = None;
        }
        entry.value += 1;
        entry.value
    }

    /// Refresh a key's TTL. Returns false if the key does not exist.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut map = self.inner.lock().expect("kv lock poisoned");
        let now = Instant::now();
        match map.get_mut(key) {
            Some(entry) if !entry.expired(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    pub fn del(&self, keys: &[String]) {
        let mut map = self.inner.lock().expect("kv lock poisoned");
        for key in keys {
            map.remove(key);
        }
    }

    fn sweep(&self) -> usize {
        let mut map = self.inner.lock().expect("kv lock poisoned");
        let now = Instant::now();
        let before = map.len();
        map.retain(|_, entry| !entry.expired(now));
        before - map.len()
    }
}

/// Background task that prunes expired entries on an interval.
pub async fn run_sweep_loop(store: TtlStore, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let removed = store.sweep();
        if removed > 0 {
            debug!("KV sweep: pruned {} expired entries", removed);
        }
    }
}
