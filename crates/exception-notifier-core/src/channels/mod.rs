//! Notification channels and dispatch
//!
//! Every configured channel is attempted for each notification. A channel
//! that fails, or panics, is recorded and the others still run.

mod email;
mod slack;
mod webhook;

pub use email::{EmailChannel, EmailMessage, HttpMailRelay, MailTransport};
pub use slack::SlackChannel;
pub use webhook::WebhookChannel;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{ExceptionInfo, RequestContext};

/// A destination for error notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name for logs and results
    fn name(&self) -> &str;

    /// Deliver one notification
    async fn deliver(
        &self,
        exception: &ExceptionInfo,
        context: &RequestContext,
    ) -> Result<(), NotificationError>;
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Non-success response or client failure
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Channel cannot be used as configured
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Transport-level failure
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(e: reqwest::Error) -> Self {
        Self::HttpError(e.to_string())
    }
}

/// Result of one channel delivery
#[derive(Debug, Clone, Serialize)]
pub struct NotificationResult {
    /// Channel name
    pub channel: String,
    /// Whether the channel accepted the notification
    pub success: bool,
    /// Failure description
    pub error: Option<String>,
    /// When delivery started
    pub sent_at: DateTime<Utc>,
}

/// Results of a dispatch across every channel
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// One entry per channel, in configuration order
    pub results: Vec<NotificationResult>,
}

impl DispatchReport {
    /// Number of channels that accepted the notification
    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Channels that failed
    pub fn failures(&self) -> impl Iterator<Item = &NotificationResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Whether every channel succeeded
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// Fans a notification out to every channel
#[derive(Clone, Default)]
pub struct Dispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl Dispatcher {
    /// Dispatcher over `channels`
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Add a channel
    pub fn add(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.push(channel);
    }

    /// Names of the configured channels
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Whether no channels are configured
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Attempt every channel, then mark the context as delivered
    pub async fn dispatch(
        &self,
        exception: &ExceptionInfo,
        context: &mut RequestContext,
    ) -> DispatchReport {
        let report = self.send_all(exception, context).await;
        context.mark_delivered();
        report
    }

    /// Attempt every channel without touching the context
    pub async fn send_all(
        &self,
        exception: &ExceptionInfo,
        context: &RequestContext,
    ) -> DispatchReport {
        let deliveries = self
            .channels
            .iter()
            .map(|channel| send(channel.as_ref(), exception, context));

        DispatchReport {
            results: join_all(deliveries).await,
        }
    }
}

/// Send through a single channel, containing failures and panics
async fn send(
    channel: &dyn NotificationChannel,
    exception: &ExceptionInfo,
    context: &RequestContext,
) -> NotificationResult {
    let sent_at = Utc::now();

    let outcome = AssertUnwindSafe(channel.deliver(exception, context))
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some("channel panicked".to_string()),
    };

    match &error {
        None => info!(
            channel = channel.name(),
            exception_id = %exception.id,
            exception_type = %exception.type_name,
            "Notification sent"
        ),
        Some(e) => {
            metrics::counter!(
                "exception_notifier_channel_failures_total",
                "channel" => channel.name().to_string()
            )
            .increment(1);
            warn!(
                channel = channel.name(),
                exception_id = %exception.id,
                error = %e,
                "Notification failed"
            );
        }
    }

    NotificationResult {
        channel: channel.name().to_string(),
        success: error.is_none(),
        error,
        sent_at,
    }
}
