//! Configuration management for the exception notifier

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{Options, ThrottleStrategy};

/// Environment variable prefix, e.g. `EXCEPTION_NOTIFIER__NOTIFIER__THROTTLE_SECONDS`
pub const ENV_PREFIX: &str = "EXCEPTION_NOTIFIER";

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter defaults
    pub notifier: NotifierConfig,

    /// Email channel
    pub email: Option<EmailConfig>,

    /// Slack channel
    pub slack: Option<SlackConfig>,

    /// Generic webhook channel
    pub webhook: Option<WebhookConfig>,

    /// Redis throttle cache
    pub redis: Option<RedisConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notifier: NotifierConfig::default(),
            email: None,
            slack: None,
            webhook: None,
            redis: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional file, then the
    /// environment.
    ///
    /// Without an explicit path the platform config directory is tried
    /// (`config.toml`), and skipped when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                if let Some(default) = default_config_path() {
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("notifier.ignore_exceptions")
                .with_list_parse_key("notifier.ignore_crawlers")
                .with_list_parse_key("email.exception_recipients")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        for pattern in &self.notifier.ignore_crawlers {
            regex::Regex::new(pattern)?;
        }

        if let Some(email) = &self.email {
            email.validate()?;
        }

        if self.notifier.throttle_seconds > 0 && self.redis.is_none() {
            return Err(Error::config(
                "throttle_seconds requires a [redis] section: throttling needs a cache shared by all instances",
            ));
        }

        Ok(())
    }

    /// Process-wide filter defaults
    pub fn options(&self) -> Options {
        self.notifier.options()
    }
}

/// Default configuration file location
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "exception-notifier", "exception-notifier")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Filter defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Type identifiers never notified
    pub ignore_exceptions: Vec<String>,
    /// Agent patterns identifying crawlers
    pub ignore_crawlers: Vec<String>,
    /// Dedup window in seconds; 0 disables throttling
    pub throttle_seconds: u64,
    /// Throttle recording strategy
    pub throttle_strategy: ThrottleStrategy,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            ignore_exceptions: Vec::new(),
            ignore_crawlers: Vec::new(),
            throttle_seconds: 0,
            throttle_strategy: ThrottleStrategy::CheckThenWrite,
        }
    }
}

impl NotifierConfig {
    /// Filter options; `ignore_if` can only be set in code
    pub fn options(&self) -> Options {
        Options {
            ignore_exceptions: self.ignore_exceptions.clone(),
            ignore_crawlers: self.ignore_crawlers.clone(),
            ignore_if: None,
            throttle_seconds: self.throttle_seconds,
            throttle_strategy: self.throttle_strategy,
        }
    }
}

/// Body format of notification emails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailFormat {
    /// Plain text
    #[default]
    Text,
    /// HTML
    Html,
}

/// Sections an email may render
pub const EMAIL_SECTIONS: &[&str] = &["request", "environment", "backtrace", "data"];

/// Email channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// From address
    pub sender_address: String,
    /// Recipients of every notification
    pub exception_recipients: Vec<String>,
    /// Prepended to every subject
    #[serde(default = "default_email_prefix")]
    pub email_prefix: String,
    /// Body format
    #[serde(default)]
    pub email_format: EmailFormat,
    /// Sections rendered for request errors
    #[serde(default = "default_sections")]
    pub sections: Vec<String>,
    /// Sections rendered for background errors
    #[serde(default = "default_background_sections")]
    pub background_sections: Vec<String>,
    /// Include the error message in the subject
    #[serde(default = "default_true")]
    pub verbose_subject: bool,
    /// Replace digit runs in the subject so similar errors thread together
    #[serde(default)]
    pub normalize_subject: bool,
    /// HTTP mail relay endpoint
    pub relay_url: Url,
    /// Bearer token for the relay
    #[serde(default)]
    pub api_token: Option<String>,
    /// Relay request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl EmailConfig {
    fn validate(&self) -> Result<()> {
        if self.exception_recipients.is_empty() {
            return Err(Error::config("email.exception_recipients must not be empty"));
        }

        for section in self.sections.iter().chain(&self.background_sections) {
            if !EMAIL_SECTIONS.contains(&section.as_str()) {
                return Err(Error::config(format!(
                    "unknown email section '{section}' (expected one of {})",
                    EMAIL_SECTIONS.join(", ")
                )));
            }
        }

        Ok(())
    }
}

/// Slack channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Incoming webhook URL
    pub webhook_url: Url,
    /// Channel override
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    /// Request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Generic webhook channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint
    pub url: Url,
    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: Url,
    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Also write daily-rotated log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

fn default_email_prefix() -> String {
    "[ERROR] ".to_string()
}

fn default_sections() -> Vec<String> {
    vec![
        "request".to_string(),
        "environment".to_string(),
        "backtrace".to_string(),
    ]
}

fn default_background_sections() -> Vec<String> {
    vec!["backtrace".to_string(), "data".to_string()]
}

const fn default_true() -> bool {
    true
}

fn default_username() -> String {
    "Exception Notifier".to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_connections() -> usize {
    10
}
