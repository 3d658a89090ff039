//! Throttle cache backends
//!
//! The throttle gate stores one key per notified fingerprint with an expiry.
//! For throttling to dedup across workers the backend must be shared by every
//! running instance.

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Visibility of a cache backend across running instances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Private to this process; cannot be trusted for throttling
    Local,
    /// Reachable by every instance
    Shared,
}

/// Key-value store with expiry used by the throttle gate
#[async_trait]
pub trait ThrottleCache: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Whether every instance sees the same keys
    fn scope(&self) -> CacheScope;

    /// Check whether `key` is present and unexpired
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Write `key`, expiring after `ttl`
    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write `key` only if absent, in one atomic step. Returns `true` if this
    /// call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
}
