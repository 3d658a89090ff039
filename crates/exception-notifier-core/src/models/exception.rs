//! Exception data models

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An application error the notifier can observe.
///
/// The type identifier is what `ignore_exceptions` entries are compared
/// against. It defaults to the fully qualified Rust type name; override it to
/// expose a stable tag instead.
pub trait Exception: std::error::Error + Send + Sync + 'static {
    /// Canonical string form of this error's type
    fn type_name(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

/// Read-only snapshot of an error, taken when it is caught
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Unique identifier of this occurrence
    pub id: Uuid,

    /// Type identifier (see [`Exception::type_name`])
    pub type_name: String,

    /// Display representation; throttle fingerprints are derived from it
    pub message: String,

    /// Debug representation
    pub details: String,

    /// Messages of the `source()` chain, outermost first
    pub causes: Vec<String>,

    /// When the error was captured
    pub occurred_at: DateTime<Utc>,
}

impl ExceptionInfo {
    /// Create a snapshot from a type identifier and message
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: Uuid::new_v4(),
            type_name: type_name.into(),
            details: message.clone(),
            message,
            causes: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Capture an error without taking ownership of it
    pub fn capture<E: Exception + ?Sized>(error: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            id: Uuid::new_v4(),
            type_name: error.type_name().into_owned(),
            message: error.to_string(),
            details: format!("{error:?}"),
            causes,
            occurred_at: Utc::now(),
        }
    }

    /// Short name of the type, without its module path
    pub fn short_type_name(&self) -> &str {
        self.type_name
            .rsplit("::")
            .next()
            .unwrap_or(&self.type_name)
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
