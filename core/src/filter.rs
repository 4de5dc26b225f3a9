//! Suspendable request and response filters.
//!
//! Filters run in the host's handler chain before routing (request filters)
//! or after the resource method produced a response (response filters). Like
//! handlers, they may suspend; the runtime's filter bridges drive them with the
//! same suspend/launch/resume protocol as invocations.

use crate::context::{RequestContext, ResponseContext};
use crate::error::HandlerError;
use crate::output::ResponseBody;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// What a request filter decided.
pub enum FilterOutcome {
    /// Let the request continue down the chain.
    Continue,

    /// Answer the request now; later stages see the result and skip.
    Abort(ResponseBody),
}

impl FilterOutcome {
    /// Whether the filter aborted the request.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

impl fmt::Debug for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "FilterOutcome::Continue"),
            Self::Abort(body) => f.debug_tuple("FilterOutcome::Abort").field(body).finish(),
        }
    }
}

/// A request filter whose body may suspend.
pub trait SuspendableRequestFilter: Send + Sync + 'static {
    /// Inspect the request and decide whether it continues.
    ///
    /// # Errors
    ///
    /// Any [`HandlerError`] is routed to the host's exception mappers with
    /// `resource_method_known = false`.
    fn filter(
        &self,
        request: Arc<dyn RequestContext>,
    ) -> BoxFuture<'static, Result<FilterOutcome, HandlerError>>;
}

/// A response filter whose body may suspend.
pub trait SuspendableResponseFilter: Send + Sync + 'static {
    /// Inspect or modify the in-flight response.
    ///
    /// # Errors
    ///
    /// Any [`HandlerError`] is routed to the host's exception mappers with
    /// `resource_method_known = true`.
    fn filter(
        &self,
        request: Arc<dyn RequestContext>,
        response: Arc<dyn ResponseContext>,
    ) -> BoxFuture<'static, Result<(), HandlerError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn abort_is_detected() {
        assert!(FilterOutcome::Abort(ResponseBody::Value(Value::Null)).is_abort());
        assert!(!FilterOutcome::Continue.is_abort());
    }

    #[test]
    fn debug_shows_abort_body() {
        let outcome = FilterOutcome::Abort(ResponseBody::Value(Value::from("denied")));
        assert_eq!(
            format!("{outcome:?}"),
            "FilterOutcome::Abort(ResponseBody::Value(String(\"denied\")))"
        );
    }
}
