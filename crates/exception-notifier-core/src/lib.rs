//! # Exception Notifier
//!
//! Error notification middleware for request-processing services.
//!
//! When a request fails, the notifier decides whether anybody should hear
//! about it and, if so, fans the notification out to every configured
//! channel. The original error always propagates unchanged.
//!
//! ## Architecture
//!
//! - **Filters**: ignore by type, by crawler agent, by predicate, then
//!   throttle by message fingerprint against a shared cache
//! - **Channels**: email, Slack and generic webhooks, each isolated from the
//!   others' failures
//! - **Interceptor**: [`ExceptionNotifier::intercept`], a tower layer for
//!   fallible services and a response layer for axum handlers
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate configuration and print the effective options
//! exception-notifier check-config
//!
//! # Send a synthetic notification through every channel
//! exception-notifier test
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cache;
pub mod channels;
pub mod config;
pub mod error;
pub mod filters;
pub mod interceptor;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};
pub use interceptor::{
    ErrorResponseLayer, ExceptionNotifier, ExceptionNotifierBuilder, ExceptionNotifierLayer,
    NotifyOutcome, ReportedError,
};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::cache::{MemoryCache, RedisCache, ThrottleCache};
    pub use crate::channels::{NotificationChannel, NotificationError};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::filters::SuppressionReason;
    pub use crate::interceptor::{
        ErrorResponseLayer, ExceptionNotifier, ExceptionNotifierLayer, NotifyOutcome,
        ReportedError,
    };
    pub use crate::models::*;
}
