//! Email notifications

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;
use url::Url;

use super::{NotificationChannel, NotificationError};
use crate::config::{EmailConfig, EmailFormat};
use crate::error;
use crate::models::{ExceptionInfo, RequestContext};

const MAX_SUBJECT_LEN: usize = 120;

/// A composed notification email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    /// Sender address
    pub from: String,
    /// Recipients
    pub to: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Rendered body
    pub body: String,
    /// MIME type of `body`
    pub content_type: &'static str,
}

/// Delivers composed emails
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

/// Posts emails as JSON to an HTTP mail relay
pub struct HttpMailRelay {
    client: Client,
    url: Url,
    api_token: Option<String>,
}

impl HttpMailRelay {
    /// Relay client using the email timeout
    pub fn new(config: &EmailConfig) -> error::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            url: config.relay_url.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailRelay {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let mut request = self.client.post(self.url.clone()).json(message);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Mail relay returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Composes error reports and hands them to a [`MailTransport`]
pub struct EmailChannel {
    config: EmailConfig,
    transport: Arc<dyn MailTransport>,
}

impl EmailChannel {
    /// Email channel delivering through the configured HTTP relay
    pub fn new(config: EmailConfig) -> error::Result<Self> {
        let transport = Arc::new(HttpMailRelay::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Email channel delivering through `transport`
    pub fn with_transport(config: EmailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self { config, transport }
    }

    /// Build the message for one notification
    pub fn compose(&self, exception: &ExceptionInfo, context: &RequestContext) -> EmailMessage {
        let sections = if context.is_background() {
            &self.config.background_sections
        } else {
            &self.config.sections
        };

        let body = match self.config.email_format {
            EmailFormat::Text => render_text(sections, exception, context),
            EmailFormat::Html => render_html(sections, exception, context),
        };

        EmailMessage {
            from: self.config.sender_address.clone(),
            to: self.config.exception_recipients.clone(),
            subject: self.subject(exception, context),
            body,
            content_type: match self.config.email_format {
                EmailFormat::Text => "text/plain",
                EmailFormat::Html => "text/html",
            },
        }
    }

    fn subject(&self, exception: &ExceptionInfo, context: &RequestContext) -> String {
        let mut subject = self.config.email_prefix.clone();

        if let Some(request) = context.request() {
            let _ = write!(subject, "{} {} ", request.method, request_path(&request.uri));
        }

        let _ = write!(subject, "({})", exception.type_name);

        if self.config.verbose_subject {
            let _ = write!(subject, " {:?}", exception.message);
        }

        if self.config.normalize_subject {
            subject = normalize_digits(&subject);
        }

        truncate(subject, MAX_SUBJECT_LEN)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(
        &self,
        exception: &ExceptionInfo,
        context: &RequestContext,
    ) -> Result<(), NotificationError> {
        let message = self.compose(exception, context);
        self.transport.send(&message).await?;

        info!(
            recipients = ?message.to,
            subject = %message.subject,
            "Email notification sent"
        );
        Ok(())
    }
}

fn request_path(uri: &str) -> &str {
    uri.split('?').next().unwrap_or(uri)
}

/// Replace each run of ASCII digits with a single `N`
fn normalize_digits(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_digits = false;
    for c in s.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                out.push('N');
            }
            in_digits = true;
        } else {
            out.push(c);
            in_digits = false;
        }
    }
    out
}

fn truncate(mut s: String, max: usize) -> String {
    if s.chars().count() <= max {
        return s;
    }
    let cut = s.char_indices().nth(max).map_or(s.len(), |(i, _)| i);
    s.truncate(cut);
    s.push_str("...");
    s
}

/// Section title and plain-text contents
fn section(name: &str, exception: &ExceptionInfo, context: &RequestContext) -> Option<(String, String)> {
    let mut out = String::new();

    match name {
        "request" => {
            let request = context.request()?;
            let _ = writeln!(out, "URL:    {}", request.uri);
            let _ = writeln!(out, "Method: {}", request.method);
            for (header, value) in &request.headers {
                let _ = writeln!(out, "{header}: {value}");
            }
        }
        "environment" | "data" => {
            if context.values().is_empty() {
                return None;
            }
            for (key, value) in context.values() {
                let _ = writeln!(out, "{key}: {value}");
            }
        }
        "backtrace" => {
            let _ = writeln!(out, "{}", exception.details);
            for cause in &exception.causes {
                let _ = writeln!(out, "caused by: {cause}");
            }
        }
        _ => return None,
    }

    Some((name.replace('_', " ").to_uppercase(), out))
}

fn render_text(sections: &[String], exception: &ExceptionInfo, context: &RequestContext) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "A {} occurred at {}:\n\n  {}\n",
        exception.type_name,
        exception.occurred_at.to_rfc3339(),
        exception.message
    );

    for name in sections {
        if let Some((title, contents)) = section(name, exception, context) {
            let _ = writeln!(body, "-------------------------------\n{title}:\n-------------------------------\n");
            let _ = writeln!(body, "{contents}");
        }
    }

    body
}

fn render_html(sections: &[String], exception: &ExceptionInfo, context: &RequestContext) -> String {
    let mut body = String::from("<html><body>");
    let _ = write!(
        body,
        "<p>A <strong>{}</strong> occurred at {}:</p><pre>{}</pre>",
        escape_html(&exception.type_name),
        exception.occurred_at.to_rfc3339(),
        escape_html(&exception.message)
    );

    for name in sections {
        if let Some((title, contents)) = section(name, exception, context) {
            let _ = write!(body, "<h2>{title}</h2><pre>{}</pre>", escape_html(&contents));
        }
    }

    body.push_str("</body></html>");
    body
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
