//! Data models for the exception notifier

mod context;
mod exception;
mod options;

pub use context::*;
pub use exception::*;
pub use options::*;
