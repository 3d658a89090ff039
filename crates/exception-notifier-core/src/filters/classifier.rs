//! Ignore-by-type filter

use crate::models::ExceptionInfo;

/// Whether the exception's type identifier appears in `ignore_list`
pub fn is_ignored(ignore_list: &[String], exception: &ExceptionInfo) -> bool {
    ignore_list.iter().any(|name| *name == exception.type_name)
}
