//! Error interception
//!
//! [`ExceptionNotifier`] sits between "an error occurred" and "a
//! notification was sent". It resolves the options for the request, runs the
//! filter chain and, unless suppressed, dispatches to every channel. The
//! intercepted error is always handed back to the caller untouched.

mod layer;

pub use layer::{
    ErrorResponseLayer, ErrorResponseService, ExceptionNotifierLayer, ExceptionNotifierService,
    ReportedError,
};

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::cache::{RedisCache, ThrottleCache};
use crate::channels::{
    DispatchReport, Dispatcher, EmailChannel, NotificationChannel, SlackChannel, WebhookChannel,
};
use crate::config::Config;
use crate::error::{BoxError, Result};
use crate::filters::{FilterChain, SuppressionReason};
use crate::models::{
    Exception, ExceptionInfo, Options, RequestContext, ThrottleStrategy, ERROR_KEY,
};

/// What happened to one intercepted error
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotifyOutcome {
    /// A filter suppressed the notification
    Suppressed { reason: SuppressionReason },
    /// Every channel was attempted
    Delivered { report: DispatchReport },
}

impl NotifyOutcome {
    /// Whether channels were attempted
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Why the notification was suppressed, if it was
    pub const fn suppression_reason(&self) -> Option<SuppressionReason> {
        match self {
            Self::Suppressed { reason } => Some(*reason),
            Self::Delivered { .. } => None,
        }
    }
}

struct Inner {
    defaults: Options,
    chain: FilterChain,
    dispatcher: Dispatcher,
}

/// Decides per error whether to notify, and notifies.
///
/// Cheap to clone; clones share channels, the throttle cache and compiled
/// crawler patterns.
#[derive(Clone)]
pub struct ExceptionNotifier {
    inner: Arc<Inner>,
}

impl ExceptionNotifier {
    /// Start configuring a notifier
    pub fn builder() -> ExceptionNotifierBuilder {
        ExceptionNotifierBuilder::default()
    }

    /// Build channels and the throttle cache from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder().options(config.options());

        if let Some(email) = &config.email {
            builder = builder.channel(EmailChannel::new(email.clone())?);
        }
        if let Some(slack) = &config.slack {
            builder = builder.channel(SlackChannel::new(slack)?);
        }
        if let Some(webhook) = &config.webhook {
            builder = builder.channel(WebhookChannel::new(webhook)?);
        }
        if let Some(redis) = &config.redis {
            builder = builder.cache(Arc::new(RedisCache::new(redis)?));
        }

        builder.build()
    }

    /// Process-wide default options
    pub fn defaults(&self) -> &Options {
        &self.inner.defaults
    }

    /// Names of the configured channels
    pub fn channel_names(&self) -> Vec<&str> {
        self.inner.dispatcher.channel_names()
    }

    /// Run the filters for `exception` and dispatch unless suppressed.
    ///
    /// Returns `Err` only for configuration errors, such as throttling
    /// requested without a shared cache or a malformed per-request crawler
    /// pattern.
    pub async fn notify(
        &self,
        context: &mut RequestContext,
        exception: &ExceptionInfo,
    ) -> Result<NotifyOutcome> {
        let options = context.resolve_options(&self.inner.defaults);

        if let Some(reason) = self.inner.chain.evaluate(&options, context, exception).await? {
            metrics::counter!("exception_notifier_suppressed_total", "reason" => reason.as_str())
                .increment(1);
            debug!(
                exception_id = %exception.id,
                exception_type = %exception.type_name,
                reason = %reason,
                "Notification suppressed"
            );
            return Ok(NotifyOutcome::Suppressed { reason });
        }

        let report = self.inner.dispatcher.dispatch(exception, context).await;
        metrics::counter!("exception_notifier_notifications_total").increment(1);
        info!(
            exception_id = %exception.id,
            exception_type = %exception.type_name,
            delivered = report.delivered(),
            channels = report.results.len(),
            "Exception notification dispatched"
        );

        Ok(NotifyOutcome::Delivered { report })
    }

    /// Notify about an error raised outside of any request.
    ///
    /// There is no agent string, so the crawler filter never fires.
    pub async fn notify_background(
        &self,
        exception: &ExceptionInfo,
        data: BTreeMap<String, Value>,
    ) -> Result<NotifyOutcome> {
        let mut context = RequestContext::background(data);
        self.notify(&mut context, exception).await
    }

    /// Send through every channel, skipping the filters
    pub async fn send_unfiltered(
        &self,
        exception: &ExceptionInfo,
        context: &RequestContext,
    ) -> DispatchReport {
        self.inner.dispatcher.send_all(exception, context).await
    }

    /// Await `pipeline`; if it fails, observe the error and return it
    /// unchanged.
    pub async fn intercept<T, E, F>(
        &self,
        context: &mut RequestContext,
        pipeline: F,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Exception,
    {
        match pipeline.await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.observe(context, &e).await;
                Err(e)
            }
        }
    }

    /// Run the notification machinery for a caught error. Failures of the
    /// machinery itself are logged and recorded in the context; they never
    /// replace the application error.
    pub async fn observe<E: Exception + ?Sized>(&self, context: &mut RequestContext, err: &E) {
        self.observe_captured(context, &ExceptionInfo::capture(err)).await;
    }

    /// [`observe`](Self::observe) for an error that was already captured
    pub async fn observe_captured(&self, context: &mut RequestContext, exception: &ExceptionInfo) {
        debug!(
            exception_id = %exception.id,
            exception_type = %exception.type_name,
            "Caught error"
        );

        if let Err(e) = self.notify(context, exception).await {
            error!(
                error = %e,
                exception_id = %exception.id,
                exception_type = %exception.type_name,
                "Exception notifier misconfigured"
            );
            context.insert(ERROR_KEY, e.to_string());
        }
    }
}

/// Builder for [`ExceptionNotifier`]
#[derive(Default)]
pub struct ExceptionNotifierBuilder {
    options: Options,
    channels: Vec<Arc<dyn NotificationChannel>>,
    cache: Option<Arc<dyn ThrottleCache>>,
}

impl ExceptionNotifierBuilder {
    /// Replace all default options
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Type identifiers never notified
    #[must_use]
    pub fn ignore_exceptions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.ignore_exceptions = names.into_iter().map(Into::into).collect();
        self
    }

    /// Agent patterns identifying crawlers
    #[must_use]
    pub fn ignore_crawlers<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.ignore_crawlers = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Conditional ignore predicate
    #[must_use]
    pub fn ignore_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestContext, &ExceptionInfo) -> std::result::Result<bool, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.options = self.options.with_ignore_if(predicate);
        self
    }

    /// Throttle window; 0 disables throttling
    #[must_use]
    pub fn throttle_seconds(mut self, seconds: u64) -> Self {
        self.options.throttle_seconds = seconds;
        self
    }

    /// Throttle recording strategy
    #[must_use]
    pub fn throttle_strategy(mut self, strategy: ThrottleStrategy) -> Self {
        self.options.throttle_strategy = strategy;
        self
    }

    /// Add a notification channel
    #[must_use]
    pub fn channel(mut self, channel: impl NotificationChannel + 'static) -> Self {
        self.channels.push(Arc::new(channel));
        self
    }

    /// Add a shared notification channel
    #[must_use]
    pub fn shared_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Throttle cache
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ThrottleCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate the defaults and build the notifier
    pub fn build(self) -> Result<ExceptionNotifier> {
        let chain = FilterChain::new(self.cache);
        chain.validate(&self.options)?;

        Ok(ExceptionNotifier {
            inner: Arc::new(Inner {
                defaults: self.options,
                chain,
                dispatcher: Dispatcher::new(self.channels),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::channels::NotificationError;
    use crate::models::OptionsOverride;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct RuntimeFailure(String);

    impl Exception for RuntimeFailure {
        fn type_name(&self) -> std::borrow::Cow<'static, str> {
            "RuntimeFailure".into()
        }
    }

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationChannel for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn deliver(
            &self,
            _exception: &ExceptionInfo,
            _context: &RequestContext,
        ) -> std::result::Result<(), NotificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn notifier_with(counter: &Arc<Counter>) -> ExceptionNotifierBuilder {
        ExceptionNotifier::builder().shared_channel(counter.clone())
    }

    #[tokio::test]
    async fn intercept_returns_the_original_error() {
        let counter = Arc::new(Counter::default());
        let notifier = notifier_with(&counter).build().unwrap();
        let mut context = RequestContext::new();

        let result: std::result::Result<(), _> = notifier
            .intercept(&mut context, async { Err(RuntimeFailure("disk full".into())) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert!(context.delivered());
    }

    #[tokio::test]
    async fn successful_pipeline_is_not_observed() {
        let counter = Arc::new(Counter::default());
        let notifier = notifier_with(&counter).build().unwrap();
        let mut context = RequestContext::new();

        let value = notifier
            .intercept(&mut context, async { Ok::<_, RuntimeFailure>(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
        assert!(!context.delivered());
        assert!(context.effective_options().is_none());
    }

    #[tokio::test]
    async fn request_override_wins_over_defaults() {
        let counter = Arc::new(Counter::default());
        let notifier = notifier_with(&counter)
            .ignore_exceptions(["RuntimeFailure"])
            .build()
            .unwrap();

        let mut context = RequestContext::new().with_options_override(OptionsOverride {
            ignore_exceptions: Some(vec![]),
            ..Default::default()
        });
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        let outcome = notifier.notify(&mut context, &exception).await.unwrap();

        assert!(outcome.is_delivered());
        assert!(context.effective_options().unwrap().ignore_exceptions.is_empty());
    }

    #[tokio::test]
    async fn suppressed_errors_are_not_marked_delivered() {
        let counter = Arc::new(Counter::default());
        let notifier = notifier_with(&counter)
            .ignore_exceptions(["RuntimeFailure"])
            .build()
            .unwrap();
        let mut context = RequestContext::new();
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        let outcome = notifier.notify(&mut context, &exception).await.unwrap();

        assert_eq!(
            outcome.suppression_reason(),
            Some(SuppressionReason::IgnoredException)
        );
        assert!(!context.delivered());
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn build_rejects_throttling_with_local_cache() {
        let err = ExceptionNotifier::builder()
            .throttle_seconds(60)
            .cache(Arc::new(MemoryCache::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn build_rejects_malformed_crawler_pattern() {
        let err = ExceptionNotifier::builder()
            .ignore_crawlers(["(Googlebot"])
            .build()
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn per_request_throttling_without_cache_is_recorded_not_raised() {
        let counter = Arc::new(Counter::default());
        let notifier = notifier_with(&counter).build().unwrap();
        let mut context = RequestContext::new().with_options_override(OptionsOverride {
            throttle_seconds: Some(30),
            ..Default::default()
        });

        let err = notifier
            .intercept(&mut context, async {
                Err::<(), _>(RuntimeFailure("disk full".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert!(context
            .get(ERROR_KEY)
            .and_then(Value::as_str)
            .unwrap()
            .starts_with("Configuration error"));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn background_errors_skip_the_crawler_filter() {
        let counter = Arc::new(Counter::default());
        let notifier = notifier_with(&counter)
            .ignore_crawlers([".*"])
            .build()
            .unwrap();
        let exception = ExceptionInfo::new("JobFailed", "export failed");

        let outcome = notifier
            .notify_background(&exception, BTreeMap::new())
            .await
            .unwrap();

        assert!(outcome.is_delivered());
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_unfiltered_bypasses_ignore_lists() {
        let counter = Arc::new(Counter::default());
        let notifier = notifier_with(&counter)
            .ignore_exceptions(["Synthetic"])
            .build()
            .unwrap();
        let exception = ExceptionInfo::new("Synthetic", "test notification");

        let report = notifier
            .send_unfiltered(&exception, &RequestContext::new())
            .await;

        assert!(report.all_succeeded());
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    }
}
