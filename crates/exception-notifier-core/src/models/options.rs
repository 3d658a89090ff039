//! Filter options and per-request overrides

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::BoxError;

use super::context::RequestContext;
use super::exception::ExceptionInfo;

/// User-supplied predicate; `Ok(true)` suppresses the notification.
///
/// An `Err` or a panic from the predicate counts as `Ok(false)`.
pub type IgnorePredicate =
    Arc<dyn Fn(&RequestContext, &ExceptionInfo) -> Result<bool, BoxError> + Send + Sync>;

/// Wrap a closure as an [`IgnorePredicate`]
pub fn ignore_predicate<F>(predicate: F) -> IgnorePredicate
where
    F: Fn(&RequestContext, &ExceptionInfo) -> Result<bool, BoxError> + Send + Sync + 'static,
{
    Arc::new(predicate)
}

/// How the throttle gate records a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleStrategy {
    /// `exists` then `write`. Two concurrent requests may both observe the key
    /// as absent and both notify.
    #[default]
    CheckThenWrite,
    /// Single atomic set-if-absent; at most one notification per window.
    SetIfAbsent,
}

/// Effective filter options for one request
#[derive(Clone, Default)]
pub struct Options {
    /// Type identifiers that are never notified
    pub ignore_exceptions: Vec<String>,
    /// Regular expressions matched against the client agent string
    pub ignore_crawlers: Vec<String>,
    /// Conditional ignore predicate
    pub ignore_if: Option<IgnorePredicate>,
    /// Dedup window in seconds; 0 disables throttling
    pub throttle_seconds: u64,
    /// Throttle recording strategy
    pub throttle_strategy: ThrottleStrategy,
}

impl Options {
    /// Set the conditional ignore predicate
    #[must_use]
    pub fn with_ignore_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestContext, &ExceptionInfo) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.ignore_if = Some(ignore_predicate(predicate));
        self
    }

    /// Whether the throttle gate will consult the cache
    pub const fn throttling_enabled(&self) -> bool {
        self.throttle_seconds > 0
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("ignore_exceptions", &self.ignore_exceptions)
            .field("ignore_crawlers", &self.ignore_crawlers)
            .field("ignore_if", &self.ignore_if.as_ref().map(|_| "<predicate>"))
            .field("throttle_seconds", &self.throttle_seconds)
            .field("throttle_strategy", &self.throttle_strategy)
            .finish()
    }
}

impl Serialize for Options {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            ignore_exceptions: &'a [String],
            ignore_crawlers: &'a [String],
            ignore_if: bool,
            throttle_seconds: u64,
            throttle_strategy: ThrottleStrategy,
        }

        View {
            ignore_exceptions: &self.ignore_exceptions,
            ignore_crawlers: &self.ignore_crawlers,
            ignore_if: self.ignore_if.is_some(),
            throttle_seconds: self.throttle_seconds,
            throttle_strategy: self.throttle_strategy,
        }
        .serialize(serializer)
    }
}

/// Per-request option values that take precedence over the process defaults.
///
/// Unset fields fall back to the defaults.
#[derive(Clone, Default)]
pub struct OptionsOverride {
    /// Replaces `Options::ignore_exceptions`
    pub ignore_exceptions: Option<Vec<String>>,
    /// Replaces `Options::ignore_crawlers`
    pub ignore_crawlers: Option<Vec<String>>,
    /// Replaces `Options::ignore_if`
    pub ignore_if: Option<IgnorePredicate>,
    /// Replaces `Options::throttle_seconds`
    pub throttle_seconds: Option<u64>,
    /// Replaces `Options::throttle_strategy`
    pub throttle_strategy: Option<ThrottleStrategy>,
}

impl OptionsOverride {
    /// Merge onto `defaults`; values set here win
    pub fn merge_onto(&self, defaults: &Options) -> Options {
        Options {
            ignore_exceptions: self
                .ignore_exceptions
                .clone()
                .unwrap_or_else(|| defaults.ignore_exceptions.clone()),
            ignore_crawlers: self
                .ignore_crawlers
                .clone()
                .unwrap_or_else(|| defaults.ignore_crawlers.clone()),
            ignore_if: self.ignore_if.clone().or_else(|| defaults.ignore_if.clone()),
            throttle_seconds: self.throttle_seconds.unwrap_or(defaults.throttle_seconds),
            throttle_strategy: self.throttle_strategy.unwrap_or(defaults.throttle_strategy),
        }
    }
}

impl fmt::Debug for OptionsOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsOverride")
            .field("ignore_exceptions", &self.ignore_exceptions)
            .field("ignore_crawlers", &self.ignore_crawlers)
            .field("ignore_if", &self.ignore_if.as_ref().map(|_| "<predicate>"))
            .field("throttle_seconds", &self.throttle_seconds)
            .field("throttle_strategy", &self.throttle_strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn defaults() -> Options {
        Options {
            ignore_exceptions: vec!["NotFound".to_string()],
            ignore_crawlers: vec!["Googlebot".to_string()],
            ignore_if: None,
            throttle_seconds: 60,
            throttle_strategy: ThrottleStrategy::CheckThenWrite,
        }
    }

    #[test]
    fn empty_override_keeps_defaults() {
        let merged = OptionsOverride::default().merge_onto(&defaults());

        assert_eq!(merged.ignore_exceptions, vec!["NotFound".to_string()]);
        assert_eq!(merged.ignore_crawlers, vec!["Googlebot".to_string()]);
        assert_eq!(merged.throttle_seconds, 60);
        assert!(merged.ignore_if.is_none());
    }

    #[test]
    fn request_values_win() {
        let request = OptionsOverride {
            ignore_exceptions: Some(vec![]),
            throttle_seconds: Some(0),
            throttle_strategy: Some(ThrottleStrategy::SetIfAbsent),
            ..Default::default()
        };
        let merged = request.merge_onto(&defaults());

        assert!(merged.ignore_exceptions.is_empty());
        assert_eq!(merged.ignore_crawlers, vec!["Googlebot".to_string()]);
        assert_eq!(merged.throttle_seconds, 0);
        assert_eq!(merged.throttle_strategy, ThrottleStrategy::SetIfAbsent);
        assert!(!merged.throttling_enabled());
    }

    #[test]
    fn serializes_without_the_predicate_body() {
        let options = defaults().with_ignore_if(|_, _| Ok(false));
        let json = serde_json::to_value(&options).unwrap();

        assert_eq!(json["ignore_if"], serde_json::json!(true));
        assert_eq!(json["throttle_strategy"], serde_json::json!("check_then_write"));
    }
}
