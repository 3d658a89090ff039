//! Suppression filters
//!
//! The chain runs, in order: ignore-by-type, ignore-by-agent,
//! ignore-by-predicate, throttle. The first filter that fires wins. The
//! throttle gate runs last so errors suppressed for any other reason never
//! take a slot in the throttle window.

pub mod classifier;
pub mod conditional;
pub mod crawler;
pub mod throttle;

pub use crawler::PatternCache;
pub use throttle::{throttle_key, ThrottleGate, KEY_PREFIX};

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::cache::ThrottleCache;
use crate::error::Result;
use crate::models::{ExceptionInfo, Options, RequestContext};

/// Why a notification was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Type identifier is in `ignore_exceptions`
    IgnoredException,
    /// Agent matched an `ignore_crawlers` pattern
    Crawler,
    /// `ignore_if` returned true
    Predicate,
    /// An equivalent error was notified within the throttle window
    Throttled,
}

impl SuppressionReason {
    /// Label used in logs and metrics
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IgnoredException => "ignored_exception",
            Self::Crawler => "crawler",
            Self::Predicate => "predicate",
            Self::Throttled => "throttled",
        }
    }
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, short-circuiting composition of the four filters
#[derive(Default)]
pub struct FilterChain {
    patterns: PatternCache,
    throttle: ThrottleGate,
}

impl FilterChain {
    /// Chain throttling against `cache`
    pub fn new(cache: Option<Arc<dyn ThrottleCache>>) -> Self {
        Self {
            patterns: PatternCache::new(),
            throttle: ThrottleGate::new(cache),
        }
    }

    /// Fail early on options that can never be honored
    pub fn validate(&self, options: &Options) -> Result<()> {
        self.patterns.validate(&options.ignore_crawlers)?;
        if options.throttling_enabled() {
            self.throttle.ensure_ready()?;
        }
        Ok(())
    }

    /// Run the filters in order and report the first that fires.
    ///
    /// Configuration errors propagate. A cache that cannot be reached does
    /// not suppress: the error is logged and the notification goes out.
    pub async fn evaluate(
        &self,
        options: &Options,
        context: &RequestContext,
        exception: &ExceptionInfo,
    ) -> Result<Option<SuppressionReason>> {
        if classifier::is_ignored(&options.ignore_exceptions, exception) {
            return Ok(Some(SuppressionReason::IgnoredException));
        }

        if self
            .patterns
            .is_crawler(&options.ignore_crawlers, context.user_agent())?
        {
            return Ok(Some(SuppressionReason::Crawler));
        }

        if conditional::is_suppressed_by_predicate(options.ignore_if.as_ref(), context, exception) {
            return Ok(Some(SuppressionReason::Predicate));
        }

        match self
            .throttle
            .should_throttle(options.throttle_seconds, options.throttle_strategy, exception)
            .await
        {
            Ok(true) => Ok(Some(SuppressionReason::Throttled)),
            Ok(false) => Ok(None),
            Err(e) if e.is_config() => Err(e),
            Err(e) => {
                warn!(error = %e, "Throttle cache unavailable, notifying without throttling");
                Ok(None)
            }
        }
    }

    /// Whether any filter suppresses the notification
    pub async fn should_suppress(
        &self,
        options: &Options,
        context: &RequestContext,
        exception: &ExceptionInfo,
    ) -> Result<bool> {
        Ok(self.evaluate(options, context, exception).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::ThrottleStrategy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Shared cache that counts every call
    #[derive(Default)]
    struct CountingCache {
        inner: MemoryCache,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ThrottleCache for CountingCache {
        fn name(&self) -> &str {
            "counting"
        }

        fn scope(&self) -> crate::cache::CacheScope {
            crate::cache::CacheScope::Shared
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.exists(key).await
        }

        async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.write(key, value, ttl).await
        }

        async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.set_if_absent(key, value, ttl).await
        }
    }

    /// Shared cache whose backend is down
    struct UnreachableCache;

    #[async_trait]
    impl ThrottleCache for UnreachableCache {
        fn name(&self) -> &str {
            "unreachable"
        }

        fn scope(&self) -> crate::cache::CacheScope {
            crate::cache::CacheScope::Shared
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            Err(crate::error::Error::cache("connection refused"))
        }

        async fn write(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(crate::error::Error::cache("connection refused"))
        }

        async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
            Err(crate::error::Error::cache("connection refused"))
        }
    }

    fn options() -> Options {
        Options {
            ignore_exceptions: vec!["NotFound".to_string()],
            ignore_crawlers: vec!["Googlebot.*".to_string()],
            ignore_if: None,
            throttle_seconds: 60,
            throttle_strategy: ThrottleStrategy::CheckThenWrite,
        }
    }

    fn chain_with(cache: &Arc<CountingCache>) -> FilterChain {
        FilterChain::new(Some(cache.clone() as Arc<dyn ThrottleCache>))
    }

    #[tokio::test]
    async fn ignored_type_wins_without_cache_access() {
        let cache = Arc::new(CountingCache::default());
        let chain = chain_with(&cache);
        let exception = ExceptionInfo::new("NotFound", "no such order");

        let reason = chain
            .evaluate(&options(), &RequestContext::new(), &exception)
            .await
            .unwrap();

        assert_eq!(reason, Some(SuppressionReason::IgnoredException));
        assert_eq!(cache.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn crawler_is_suppressed_and_consumes_no_throttle_slot() {
        let cache = Arc::new(CountingCache::default());
        let chain = chain_with(&cache);
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");
        let crawler = RequestContext::new().with_user_agent("Googlebot/2.1");

        let reason = chain.evaluate(&options(), &crawler, &exception).await.unwrap();
        assert_eq!(reason, Some(SuppressionReason::Crawler));
        assert!(cache.inner.is_empty());

        // A human hitting the same error right after still gets notified.
        let human = RequestContext::new().with_user_agent("Mozilla/5.0");
        let reason = chain.evaluate(&options(), &human, &exception).await.unwrap();
        assert_eq!(reason, None);
    }

    #[tokio::test]
    async fn predicate_runs_before_throttle() {
        let cache = Arc::new(CountingCache::default());
        let chain = chain_with(&cache);
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");
        let options = options().with_ignore_if(|_, _| Ok(true));

        let reason = chain
            .evaluate(&options, &RequestContext::new(), &exception)
            .await
            .unwrap();

        assert_eq!(reason, Some(SuppressionReason::Predicate));
        assert_eq!(cache.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_error_is_throttled() {
        let cache = Arc::new(CountingCache::default());
        let chain = chain_with(&cache);
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");
        let context = RequestContext::new();

        assert!(!chain.should_suppress(&options(), &context, &exception).await.unwrap());
        assert_eq!(
            chain.evaluate(&options(), &context, &exception).await.unwrap(),
            Some(SuppressionReason::Throttled)
        );
    }

    #[tokio::test]
    async fn unreachable_cache_fails_open() {
        let chain = FilterChain::new(Some(Arc::new(UnreachableCache)));
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        let reason = chain
            .evaluate(&options(), &RequestContext::new(), &exception)
            .await
            .unwrap();
        assert_eq!(reason, None);
    }

    #[tokio::test]
    async fn local_cache_with_throttling_is_a_config_error() {
        let chain = FilterChain::new(Some(Arc::new(MemoryCache::new())));
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        assert!(chain.validate(&options()).unwrap_err().is_config());
        let err = chain
            .evaluate(&options(), &RequestContext::new(), &exception)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn validate_rejects_malformed_crawler_patterns() {
        let chain = FilterChain::default();
        let options = Options {
            ignore_crawlers: vec!["(bot".to_string()],
            ..Default::default()
        };
        assert!(chain.validate(&options).unwrap_err().is_config());
    }
}
