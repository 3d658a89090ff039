//! Throttle-by-fingerprint filter

use std::sync::Arc;
use std::time::Duration;

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::cache::{CacheScope, ThrottleCache};
use crate::error::{Error, Result};
use crate::models::{ExceptionInfo, ThrottleStrategy};

/// Prefix of every throttle cache key
pub const KEY_PREFIX: &str = "exception-notifier-";

/// Value stored under a throttle key
const MARKER: &str = "1";

/// Cache key for an error message: prefix + hex SHA-1 of the message.
///
/// Errors with identical messages share a key regardless of type.
pub fn throttle_key(message: &str) -> String {
    format!("{KEY_PREFIX}{}", hex::encode(Sha1::digest(message.as_bytes())))
}

/// Decides whether an equivalent error was already notified within the window
#[derive(Clone, Default)]
pub struct ThrottleGate {
    cache: Option<Arc<dyn ThrottleCache>>,
}

impl ThrottleGate {
    /// Gate backed by `cache`
    pub fn new(cache: Option<Arc<dyn ThrottleCache>>) -> Self {
        Self { cache }
    }

    /// The cache, if it can be trusted for throttling
    pub fn ensure_ready(&self) -> Result<&dyn ThrottleCache> {
        match self.cache.as_deref() {
            Some(cache) if cache.scope() == CacheScope::Shared => Ok(cache),
            Some(cache) => Err(Error::config(format!(
                "throttling requires a cache shared by all instances, but the '{}' cache is local to this process",
                cache.name()
            ))),
            None => Err(Error::config(
                "throttling requires a shared cache, but none is configured",
            )),
        }
    }

    /// Returns `true` when `exception` should be suppressed.
    ///
    /// A zero window disables throttling without touching the cache. With
    /// [`ThrottleStrategy::CheckThenWrite`] the check and the write are two
    /// round trips, so concurrent identical errors can all pass.
    pub async fn should_throttle(
        &self,
        window_seconds: u64,
        strategy: ThrottleStrategy,
        exception: &ExceptionInfo,
    ) -> Result<bool> {
        if window_seconds == 0 {
            return Ok(false);
        }

        let cache = self.ensure_ready()?;
        let key = throttle_key(&exception.message);
        let ttl = Duration::from_secs(window_seconds);
        debug!(key = %key, strategy = ?strategy, "exception-notifier throttle key");

        match strategy {
            ThrottleStrategy::CheckThenWrite => {
                let exists = cache.exists(&key).await?;
                if !exists {
                    cache.write(&key, MARKER, ttl).await?;
                }
                Ok(exists)
            }
            ThrottleStrategy::SetIfAbsent => {
                let created = cache.set_if_absent(&key, MARKER, ttl).await?;
                Ok(!created)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn gate(cache: &Arc<MemoryCache>) -> ThrottleGate {
        ThrottleGate::new(Some(cache.clone() as Arc<dyn ThrottleCache>))
    }

    #[test]
    fn key_is_prefixed_sha1_hex() {
        assert_eq!(
            throttle_key("abc"),
            "exception-notifier-a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_ne!(throttle_key("disk full"), throttle_key("disk full!"));
    }

    #[tokio::test]
    async fn zero_window_never_touches_the_cache() {
        // No cache at all: a zero window must still succeed.
        let gate = ThrottleGate::default();
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        let throttled = gate
            .should_throttle(0, ThrottleStrategy::CheckThenWrite, &exception)
            .await
            .unwrap();
        assert!(!throttled);
    }

    #[tokio::test(start_paused = true)]
    async fn first_occurrence_writes_key_and_repeat_is_throttled() {
        let cache = Arc::new(MemoryCache::single_instance());
        let gate = gate(&cache);
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");
        let key = throttle_key("disk full");

        let first = gate
            .should_throttle(60, ThrottleStrategy::CheckThenWrite, &exception)
            .await
            .unwrap();
        assert!(!first);
        assert_eq!(cache.expires_in(&key), Some(Duration::from_secs(60)));
        assert_eq!(cache.value(&key).as_deref(), Some(MARKER));

        let second = gate
            .should_throttle(60, ThrottleStrategy::CheckThenWrite, &exception)
            .await
            .unwrap();
        assert!(second);

        tokio::time::advance(Duration::from_secs(61)).await;
        let after_expiry = gate
            .should_throttle(60, ThrottleStrategy::CheckThenWrite, &exception)
            .await
            .unwrap();
        assert!(!after_expiry);
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_strategy_throttles_repeats() {
        let cache = Arc::new(MemoryCache::single_instance());
        let gate = gate(&cache);
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        assert!(!gate
            .should_throttle(30, ThrottleStrategy::SetIfAbsent, &exception)
            .await
            .unwrap());
        assert!(gate
            .should_throttle(30, ThrottleStrategy::SetIfAbsent, &exception)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn same_message_different_type_shares_a_fingerprint() {
        let cache = Arc::new(MemoryCache::single_instance());
        let gate = gate(&cache);

        let first = ExceptionInfo::new("IoError", "disk full");
        let second = ExceptionInfo::new("StorageError", "disk full");

        assert!(!gate
            .should_throttle(60, ThrottleStrategy::CheckThenWrite, &first)
            .await
            .unwrap());
        assert!(gate
            .should_throttle(60, ThrottleStrategy::CheckThenWrite, &second)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn local_cache_is_a_config_error() {
        let cache = Arc::new(MemoryCache::new());
        let gate = gate(&cache);
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        let err = gate
            .should_throttle(60, ThrottleStrategy::CheckThenWrite, &exception)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn missing_cache_is_a_config_error() {
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");
        let err = ThrottleGate::default()
            .should_throttle(5, ThrottleStrategy::SetIfAbsent, &exception)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
