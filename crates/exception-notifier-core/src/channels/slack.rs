//! Slack notifications

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;
use url::Url;

use super::{NotificationChannel, NotificationError};
use crate::config::SlackConfig;
use crate::error;
use crate::models::{ExceptionInfo, RequestContext};

const DANGER: &str = "#dc3545";

/// Posts notifications to a Slack incoming webhook
pub struct SlackChannel {
    client: Client,
    webhook_url: Url,
    channel: Option<String>,
    username: String,
}

impl SlackChannel {
    /// Slack channel from configuration
    pub fn new(config: &SlackConfig) -> error::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
            channel: config.channel.clone(),
            username: config.username.clone(),
        })
    }

    fn payload(&self, exception: &ExceptionInfo, context: &RequestContext) -> SlackPayload {
        let mut fields = vec![SlackField {
            title: "Type".to_string(),
            value: exception.type_name.clone(),
            short: true,
        }];

        if let Some(request) = context.request() {
            fields.push(SlackField {
                title: "Request".to_string(),
                value: format!("{} {}", request.method, request.uri),
                short: true,
            });
        }

        if let Some(agent) = context.user_agent() {
            fields.push(SlackField {
                title: "User Agent".to_string(),
                value: agent.to_string(),
                short: false,
            });
        }

        let title = if context.is_background() {
            format!("🚨 Background error: {}", exception.short_type_name())
        } else {
            format!("🚨 {}", exception.short_type_name())
        };

        SlackPayload {
            channel: self.channel.clone(),
            username: Some(self.username.clone()),
            icon_emoji: Some(":rotating_light:".to_string()),
            attachments: vec![SlackAttachment {
                color: DANGER.to_string(),
                title,
                text: exception.message.clone(),
                fields,
                footer: Some(exception.id.to_string()),
                ts: Some(exception.occurred_at.timestamp()),
            }],
        }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn deliver(
        &self,
        exception: &ExceptionInfo,
        context: &RequestContext,
    ) -> Result<(), NotificationError> {
        let payload = self.payload(exception, context);

        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Slack returned {}: {}",
                status, body
            )));
        }

        info!(exception_id = %exception.id, "Slack notification sent");
        Ok(())
    }
}

// Slack payload types
#[derive(Debug, Serialize)]
struct SlackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<String>,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: String,
    title: String,
    text: String,
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> SlackConfig {
        SlackConfig {
            webhook_url: url.parse().unwrap(),
            channel: Some("#errors".to_string()),
            username: "Exception Notifier".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn posts_attachment_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/T000/B000"))
            .and(body_partial_json(serde_json::json!({
                "channel": "#errors",
                "attachments": [{ "text": "disk full" }]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = SlackChannel::new(&config(&format!("{}/services/T000/B000", server.uri()))).unwrap();
        let exception = ExceptionInfo::new("app::RuntimeFailure", "disk full");
        let context = RequestContext::new().with_user_agent("curl/8.0");

        channel.deliver(&exception, &context).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(&config(&server.uri())).unwrap();
        let exception = ExceptionInfo::new("RuntimeFailure", "disk full");

        let err = channel
            .deliver(&exception, &RequestContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Slack returned 404"));
    }

    #[test]
    fn payload_carries_agent_and_short_type() {
        let channel = SlackChannel::new(&config("https://hooks.slack.com/services/x")).unwrap();
        let exception = ExceptionInfo::new("app::errors::RuntimeFailure", "disk full");
        let context = RequestContext::new().with_user_agent("Mozilla/5.0");

        let payload = channel.payload(&exception, &context);
        let attachment = &payload.attachments[0];

        assert_eq!(attachment.title, "🚨 RuntimeFailure");
        assert_eq!(attachment.fields.len(), 2);
        assert_eq!(attachment.fields[1].value, "Mozilla/5.0");
    }
}
