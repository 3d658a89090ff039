//! Generic webhook notifications

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use url::Url;

use super::{NotificationChannel, NotificationError};
use crate::config::WebhookConfig;
use crate::error;
use crate::models::{ExceptionInfo, RequestContext, RequestInfo};

/// Posts a JSON description of each error to an arbitrary URL
pub struct WebhookChannel {
    client: Client,
    url: Url,
    headers: BTreeMap<String, String>,
}

impl WebhookChannel {
    /// Webhook channel from configuration
    pub fn new(config: &WebhookConfig) -> error::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            headers: config.headers.clone(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(
        &self,
        exception: &ExceptionInfo,
        context: &RequestContext,
    ) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            exception_id: exception.id.to_string(),
            exception_type: &exception.type_name,
            message: &exception.message,
            causes: &exception.causes,
            occurred_at: exception.occurred_at,
            background: context.is_background(),
            request: context.request(),
            context: context.values(),
        };

        let mut request = self.client.post(self.url.clone()).json(&payload);

        // Add custom headers if provided
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Webhook returned {}: {}",
                status, body
            )));
        }

        info!(exception_id = %exception.id, url = %self.url, "Webhook notification sent");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    exception_id: String,
    exception_type: &'a str,
    message: &'a str,
    causes: &'a [String],
    occurred_at: DateTime<Utc>,
    background: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<&'a RequestInfo>,
    context: &'a BTreeMap<String, Value>,
}
