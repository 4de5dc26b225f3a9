//! The per-request host object and the identifiers that travel with it.
//!
//! A [`RequestContext`] is created by the host for every inbound request and
//! lives until the response is fully written or the connection closes. The
//! bridge only ever touches it from the connection's event loop (see
//! [`HostExecutor`]).

use crate::error::BridgeError;
use crate::executor::HostExecutor;
use crate::output::ResponseBody;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identifier of one inbound request, unique per host process.
///
/// # Examples
///
/// ```
/// use suspend_bridge_core::RequestId;
///
/// let id = RequestId::new(7);
/// assert_eq!(id.value(), 7);
/// assert_eq!(id.to_string(), "req-7");
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Create a new `RequestId` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw identifier.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// The resource instance a handler method is invoked on.
///
/// Produced by the host's DI container; the bridge passes it through untouched.
pub type EndpointInstance = Arc<dyn Any + Send + Sync>;

/// Already-deserialized endpoint parameters, in declaration order.
pub type Parameters = Vec<Value>;

/// Callback run by the host when the underlying connection closes.
pub type CloseHandler = Box<dyn FnOnce() + Send + 'static>;

/// Request Execution Context supplied by the host for every inbound request.
///
/// All methods are invoked either synchronously from the host's handler chain
/// or from a continuation running on [`RequestContext::executor`]; the host
/// never sees concurrent calls for the same request.
pub trait RequestContext: Send + Sync + 'static {
    /// Identifier used for logging and scope bookkeeping.
    fn request_id(&self) -> RequestId;

    /// Whether a prior stage already produced the response.
    fn has_result(&self) -> bool;

    /// Store the response produced by the handler or a filter.
    fn set_result(&self, body: ResponseBody);

    /// The resource instance the handler belongs to.
    fn endpoint_instance(&self) -> EndpointInstance;

    /// Parameters extracted for the matched endpoint.
    fn parameters(&self) -> Parameters;

    /// Stop the synchronous handler chain; the bridge promises a later
    /// [`resume`](RequestContext::resume) or connection cleanup.
    fn suspend(&self);

    /// Continue the handler chain after a suspension.
    fn resume(&self);

    /// Register a handler fired once when the connection closes.
    fn on_close(&self, handler: CloseHandler);

    /// Release the connection's resources without writing a response.
    fn close_connection(&self);

    /// Route a failure into the host's exception mappers.
    ///
    /// `resource_method_known` tells the host the target resource method is
    /// still the one it matched, so response filters keep running.
    fn handle_exception(&self, error: BridgeError, resource_method_known: bool);

    /// The single-threaded execution context that owns this connection.
    fn executor(&self) -> Arc<dyn HostExecutor>;
}

/// The in-flight response seen by response filters.
pub trait ResponseContext: Send + Sync + 'static {
    /// Current HTTP status code.
    fn status(&self) -> u16;

    /// Replace the HTTP status code.
    fn set_status(&self, status: u16);

    /// Look up a response header (case-insensitive).
    fn header(&self, name: &str) -> Option<String>;

    /// Set a response header, replacing any previous value.
    fn set_header(&self, name: &str, value: String);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_display_and_ordering() {
        let first = RequestId::new(1);
        let second = RequestId::from(2);

        assert!(first < second);
        assert_eq!(format!("{second}"), "req-2");
        assert_eq!(second.value(), 2);
    }

    #[test]
    fn request_id_serializes_as_number() {
        let json = serde_json::to_value(RequestId::new(42)).unwrap_or(Value::Null);
        assert_eq!(json, serde_json::json!(42));
    }
}
