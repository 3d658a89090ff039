//! Per-request context

use std::collections::BTreeMap;

use axum::http::{header, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::options::{Options, OptionsOverride};

/// Set to `true` once every configured channel has been attempted
pub const DELIVERED_KEY: &str = "notification.delivered";

/// Notification machinery failure recorded during interception
pub const ERROR_KEY: &str = "exception_notifier.error";

/// Client agent string matched against `ignore_crawlers`
pub const USER_AGENT_KEY: &str = "http.user_agent";

/// Headers whose values are never copied into a notification
const FILTERED_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    "x-api-key",
];

const FILTERED: &str = "[FILTERED]";

/// HTTP request summary shown in notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Request URI
    pub uri: String,
    /// Headers, with secrets filtered
    pub headers: BTreeMap<String, String>,
}

/// Mutable state for one in-flight request.
///
/// Created by the caller, enriched by the notifier, never shared between
/// requests.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    values: BTreeMap<String, Value>,
    request: Option<RequestInfo>,
    options_override: Option<OptionsOverride>,
    effective_options: Option<Options>,
    background: bool,
}

impl RequestContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for an error raised outside of any request
    pub fn background(data: BTreeMap<String, Value>) -> Self {
        Self {
            values: data,
            background: true,
            ..Self::default()
        }
    }

    /// Build a context from an HTTP request.
    ///
    /// An [`OptionsOverride`] found in the request extensions becomes the
    /// per-request override.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let headers = req
            .headers()
            .iter()
            .map(|(name, value)| {
                let name = name.as_str().to_owned();
                let value = if FILTERED_HEADERS.contains(&name.as_str()) {
                    FILTERED.to_owned()
                } else {
                    String::from_utf8_lossy(value.as_bytes()).into_owned()
                };
                (name, value)
            })
            .collect();

        let mut context = Self {
            request: Some(RequestInfo {
                method: req.method().to_string(),
                uri: req.uri().to_string(),
                headers,
            }),
            options_override: req.extensions().get::<OptionsOverride>().cloned(),
            ..Self::default()
        };

        if let Some(agent) = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
        {
            context.insert(USER_AGENT_KEY, agent);
        }

        context
    }

    /// Set the client agent string
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.insert(USER_AGENT_KEY, agent.into());
        self
    }

    /// Set the per-request options override
    #[must_use]
    pub fn with_options_override(mut self, options: OptionsOverride) -> Self {
        self.options_override = Some(options);
        self
    }

    /// Insert a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// All values, ordered by key
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// The client agent string, if the request declared one
    pub fn user_agent(&self) -> Option<&str> {
        self.get(USER_AGENT_KEY).and_then(Value::as_str)
    }

    /// The HTTP request this context belongs to
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    /// Whether this context describes a background error
    pub const fn is_background(&self) -> bool {
        self.background
    }

    /// Per-request options override
    pub fn options_override(&self) -> Option<&OptionsOverride> {
        self.options_override.as_ref()
    }

    /// Replace the per-request options override
    pub fn set_options_override(&mut self, options: OptionsOverride) {
        self.options_override = Some(options);
    }

    /// Options the filter chain ran with, once resolved
    pub fn effective_options(&self) -> Option<&Options> {
        self.effective_options.as_ref()
    }

    /// Merge the per-request override onto `defaults` and remember the result
    pub fn resolve_options(&mut self, defaults: &Options) -> Options {
        let options = match &self.options_override {
            Some(request) => request.merge_onto(defaults),
            None => defaults.clone(),
        };
        self.effective_options = Some(options.clone());
        options
    }

    /// Whether a notification was dispatched for this request
    pub fn delivered(&self) -> bool {
        self.get(DELIVERED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub(crate) fn mark_delivered(&mut self) {
        self.insert(DELIVERED_KEY, true);
    }
}
