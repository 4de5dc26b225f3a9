//! Event-loop dispatcher.
//!
//! Routes every continuation of a request task back onto the connection's
//! event loop, with the request's captured scope active and the request
//! registered as the executor's current request.

use crate::capture::CapturedScope;
use crate::metrics::DispatchMetrics;
use crate::task::{Continuation, Dispatcher};
use std::sync::Arc;
use suspend_bridge_core::{HostExecutor, RequestContext};

/// [`Dispatcher`] bound to one request and its connection's executor.
pub struct EventLoopDispatcher {
    executor: Arc<dyn HostExecutor>,
    request: Arc<dyn RequestContext>,
    scope: Arc<CapturedScope>,
}

impl EventLoopDispatcher {
    /// Bind a dispatcher to `request`'s executor.
    #[must_use]
    pub fn new(request: Arc<dyn RequestContext>, scope: Arc<CapturedScope>) -> Self {
        Self {
            executor: request.executor(),
            request,
            scope,
        }
    }

    /// The captured scope activated around every continuation.
    #[must_use]
    pub const fn scope(&self) -> &Arc<CapturedScope> {
        &self.scope
    }
}

impl Dispatcher for EventLoopDispatcher {
    fn dispatch(&self, continuation: Continuation) {
        let executor = Arc::clone(&self.executor);
        let request = Arc::clone(&self.request);
        let scope = Arc::clone(&self.scope);
        let request_id = request.request_id();

        let submitted = self.executor.run_on_context(Box::new(move || {
            let _activation = match scope.activate() {
                Ok(activation) => activation,
                Err(error) => {
                    tracing::error!(
                        request_id = %request_id,
                        %error,
                        "Request scope refused activation; dropping continuation"
                    );
                    DispatchMetrics::record_refused();
                    drop(continuation);
                    return;
                }
            };
            let _current = executor.current_request().enter(request);

            tracing::trace!(request_id = %request_id, task_id = ?continuation.task_id(), "Resuming task");
            continuation.resume();
        }));

        // The rejected job, and the continuation inside it, is already dropped
        if let Err(error) = submitted {
            tracing::warn!(
                request_id = %request_id,
                %error,
                "Event loop rejected continuation"
            );
        }
    }
}

impl std::fmt::Debug for EventLoopDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopDispatcher")
            .field("executor", &self.executor.name())
            .field("request_id", &self.request.request_id())
            .finish_non_exhaustive()
    }
}
