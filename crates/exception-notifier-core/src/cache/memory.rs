//! In-process throttle cache

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CacheScope, ThrottleCache};
use crate::error::Result;

/// Expired entries are swept after this many inserts
const SWEEP_INTERVAL: usize = 256;

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: Instant,
}

impl CachedValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Cache held in this process's memory.
///
/// Reports [`CacheScope::Local`] unless built with
/// [`MemoryCache::single_instance`], so throttling against it is refused in
/// multi-worker deployments.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CachedValue>,
    scope: CacheScope,
    inserts: AtomicUsize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Create a process-local cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            scope: CacheScope::Local,
            inserts: AtomicUsize::new(0),
        }
    }

    /// Create a cache for deployments where this process is the only
    /// instance, making it authoritative for throttling
    pub fn single_instance() -> Self {
        Self {
            entries: DashMap::new(),
            scope: CacheScope::Shared,
            inserts: AtomicUsize::new(0),
        }
    }

    /// Time left before `key` expires
    pub fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Stored value of `key`
    pub fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Drop every expired key
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    /// Whether no live keys remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count an insert and sweep once every [`SWEEP_INTERVAL`].
    ///
    /// Must not be called while holding an entry guard.
    fn note_insert(&self) {
        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }
    }

    fn entry(value: &str, ttl: Duration) -> CachedValue {
        CachedValue {
            value: value.to_owned(),
            expires_at: Instant::now() + ttl,
        }
    }
}

#[async_trait]
impl ThrottleCache for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    fn scope(&self) -> CacheScope {
        self.scope
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let live = self.entries.get(key).map(|entry| entry.is_live(now));

        match live {
            Some(true) => Ok(true),
            Some(false) => {
                self.entries.remove_if(key, |_, entry| !entry.is_live(now));
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(key.to_owned(), Self::entry(value, ttl));
        self.note_insert();
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let created = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(Self::entry(value, ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Self::entry(value, ttl));
                true
            }
        };

        if created {
            self.note_insert();
        }
        Ok(created)
    }
}
