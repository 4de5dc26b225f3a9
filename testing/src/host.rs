//! Mock host objects: request context and response.

#![allow(clippy::module_name_repetitions)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use suspend_bridge_core::{
    BridgeError, CloseHandler, EndpointInstance, HostExecutor, Parameters, RequestContext,
    RequestId, ResponseBody, ResponseContext, Value,
};
use tokio::sync::watch;

/// Something the bridge did to the host, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// `suspend()` was called
    Suspended,
    /// `resume()` was called; carries the executor's current request at the time
    Resumed {
        /// Request registered as current on the executor during the call
        current_request: Option<RequestId>,
    },
    /// `set_result()` was called
    ResultSet,
    /// A close handler was registered
    CloseHandlerRegistered,
    /// `close_connection()` was called
    ConnectionClosed,
    /// `handle_exception()` was called
    Exception {
        /// Rendered error
        message: String,
        /// The flag passed along with the error
        resource_method_known: bool,
    },
}

/// Recording [`RequestContext`] for tests.
///
/// Every call is appended to an event log. Close handlers are kept until
/// [`fire_close`](Self::fire_close) simulates the client disconnecting.
///
/// # Example
///
/// ```ignore
/// let request = Arc::new(
///     MockRequestContext::new(1, event_loop.clone())
///         .with_parameters(vec![json!("world")]),
/// );
///
/// bridge.handle(request.clone());
/// assert!(request.wait_settled(Duration::from_secs(1)).await);
/// assert_eq!(request.result_value(), Some(json!("hello world")));
/// ```
pub struct MockRequestContext {
    id: RequestId,
    executor: Arc<dyn HostExecutor>,
    instance: EndpointInstance,
    parameters: Parameters,
    result: Mutex<Option<ResponseBody>>,
    close_handlers: Mutex<Vec<CloseHandler>>,
    closed: Mutex<bool>,
    events: Mutex<Vec<HostEvent>>,
    exceptions: Mutex<Vec<(BridgeError, bool)>>,
    settled: watch::Sender<usize>,
}

impl MockRequestContext {
    /// A request with no parameters, a unit endpoint instance, and no result.
    #[must_use]
    pub fn new(id: u64, executor: Arc<dyn HostExecutor>) -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            id: RequestId::new(id),
            executor,
            instance: Arc::new(()),
            parameters: Vec::new(),
            result: Mutex::new(None),
            close_handlers: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
            events: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
            settled,
        }
    }

    /// Set the endpoint parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the endpoint instance.
    #[must_use]
    pub fn with_instance(mut self, instance: EndpointInstance) -> Self {
        self.instance = instance;
        self
    }

    /// Pretend an earlier stage already produced `body`.
    #[must_use]
    pub fn with_result(self, body: ResponseBody) -> Self {
        *lock(&self.result) = Some(body);
        self
    }

    /// Simulate the client disconnecting: run every registered close handler.
    ///
    /// Handlers registered afterwards run immediately.
    pub fn fire_close(&self) {
        *lock(&self.closed) = true;
        let handlers = std::mem::take(&mut *lock(&self.close_handlers));
        for handler in handlers {
            handler();
        }
    }

    /// Wait until the bridge resumed the pipeline or closed the connection.
    pub async fn wait_settled(&self, timeout: Duration) -> bool {
        let mut settled = self.settled.subscribe();
        tokio::time::timeout(timeout, settled.wait_for(|count| *count > 0))
            .await
            .is_ok_and(|outcome| outcome.is_ok())
    }

    /// Snapshot of the event log.
    #[must_use]
    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.events).clone()
    }

    /// Number of `resume()` calls.
    #[must_use]
    pub fn resume_count(&self) -> usize {
        self.count(|event| matches!(event, HostEvent::Resumed { .. }))
    }

    /// Number of `close_connection()` calls.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.count(|event| matches!(event, HostEvent::ConnectionClosed))
    }

    /// Number of `handle_exception()` calls.
    #[must_use]
    pub fn exception_count(&self) -> usize {
        lock(&self.exceptions).len()
    }

    /// The stored result, if it is a plain value.
    #[must_use]
    pub fn result_value(&self) -> Option<Value> {
        lock(&self.result).as_ref().and_then(|body| body.as_value().cloned())
    }

    /// Whether any result is stored.
    #[must_use]
    pub fn has_stored_result(&self) -> bool {
        lock(&self.result).is_some()
    }

    /// Remove and return the stored result.
    #[must_use]
    pub fn take_result(&self) -> Option<ResponseBody> {
        lock(&self.result).take()
    }

    /// Remove and return the recorded exceptions with their flags.
    #[must_use]
    pub fn take_exceptions(&self) -> Vec<(BridgeError, bool)> {
        std::mem::take(&mut *lock(&self.exceptions))
    }

    fn count(&self, predicate: impl Fn(&HostEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|event| predicate(event)).count()
    }

    fn record(&self, event: HostEvent) {
        lock(&self.events).push(event);
    }

    fn mark_settled(&self) {
        self.settled.send_modify(|count| *count += 1);
    }
}

impl RequestContext for MockRequestContext {
    fn request_id(&self) -> RequestId {
        self.id
    }

    fn has_result(&self) -> bool {
        lock(&self.result).is_some()
    }

    fn set_result(&self, body: ResponseBody) {
        *lock(&self.result) = Some(body);
        self.record(HostEvent::ResultSet);
    }

    fn endpoint_instance(&self) -> EndpointInstance {
        Arc::clone(&self.instance)
    }

    fn parameters(&self) -> Parameters {
        self.parameters.clone()
    }

    fn suspend(&self) {
        self.record(HostEvent::Suspended);
    }

    fn resume(&self) {
        let current_request = self.executor.current_request().request_id();
        self.record(HostEvent::Resumed { current_request });
        self.mark_settled();
    }

    fn on_close(&self, handler: CloseHandler) {
        self.record(HostEvent::CloseHandlerRegistered);
        if *lock(&self.closed) {
            handler();
        } else {
            lock(&self.close_handlers).push(handler);
        }
    }

    fn close_connection(&self) {
        self.record(HostEvent::ConnectionClosed);
        self.mark_settled();
    }

    fn handle_exception(&self, error: BridgeError, resource_method_known: bool) {
        self.record(HostEvent::Exception {
            message: error.to_string(),
            resource_method_known,
        });
        lock(&self.exceptions).push((error, resource_method_known));
    }

    fn executor(&self) -> Arc<dyn HostExecutor> {
        Arc::clone(&self.executor)
    }
}

impl std::fmt::Debug for MockRequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRequestContext")
            .field("id", &self.id)
            .field("events", &self.events())
            .finish_non_exhaustive()
    }
}

/// In-memory [`ResponseContext`].
#[derive(Debug)]
pub struct MockResponse {
    status: Mutex<u16>,
    headers: Mutex<HashMap<String, String>>,
}

impl MockResponse {
    /// A response with the given status and no headers.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status: Mutex::new(status),
            headers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::new(200)
    }
}

impl ResponseContext for MockResponse {
    fn status(&self) -> u16 {
        *lock(&self.status)
    }

    fn set_status(&self, status: u16) {
        *lock(&self.status) = status;
    }

    fn header(&self, name: &str) -> Option<String> {
        lock(&self.headers).get(&name.to_ascii_lowercase()).cloned()
    }

    fn set_header(&self, name: &str, value: String) {
        lock(&self.headers).insert(name.to_ascii_lowercase(), value);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
