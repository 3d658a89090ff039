//! Ignore-by-predicate filter

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::models::{ExceptionInfo, IgnorePredicate, RequestContext};

/// Run the user's predicate. A predicate that errors or panics does not
/// suppress; the failure is logged.
pub fn is_suppressed_by_predicate(
    predicate: Option<&IgnorePredicate>,
    context: &RequestContext,
    exception: &ExceptionInfo,
) -> bool {
    let Some(predicate) = predicate else {
        return false;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| predicate(context, exception))) {
        Ok(Ok(suppress)) => suppress,
        Ok(Err(e)) => {
            warn!(
                error = %e,
                exception_type = %exception.type_name,
                "ignore_if predicate failed, notifying anyway"
            );
            false
        }
        Err(payload) => {
            warn!(
                panic = %panic_message(payload.as_ref()),
                exception_type = %exception.type_name,
                "ignore_if predicate panicked, notifying anyway"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}
