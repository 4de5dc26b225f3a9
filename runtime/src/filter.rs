//! Request- and response-filter bridges.
//!
//! Same suspend/launch/resume protocol as [`InvocationBridge`](crate::InvocationBridge),
//! differing only in what a successful body delivers and which flag failures
//! carry into the host's exception mappers.

use crate::bridge::{BridgeCore, Dispatch, Stage};
use crate::identity::ExecutionIdentity;
use crate::scope::TaskScope;
use std::sync::Arc;
use suspend_bridge_core::{
    FilterOutcome, RequestContext, RequestScopeManager, ResponseContext,
    SuspendableRequestFilter, SuspendableResponseFilter,
};

/// Runs a [`SuspendableRequestFilter`] before routing.
///
/// `Abort` stores the filter's response; the invocation bridge downstream then
/// sees a result and skips the handler. Failures are reported with
/// `resource_method_known = false` since routing has not happened yet.
pub struct RequestFilterBridge {
    core: BridgeCore,
    filter: Arc<dyn SuspendableRequestFilter>,
}

impl RequestFilterBridge {
    /// Build a bridge around `filter`.
    #[must_use]
    pub fn new(
        tasks: Arc<TaskScope>,
        scope_manager: Arc<dyn RequestScopeManager>,
        filter: Arc<dyn SuspendableRequestFilter>,
    ) -> Self {
        Self {
            core: BridgeCore::new(tasks, scope_manager, Stage::RequestFilter),
            filter,
        }
    }

    /// Override the execution identity installed into this bridge's tasks.
    #[must_use]
    pub fn with_identity(mut self, identity: ExecutionIdentity) -> Self {
        self.core.set_identity(identity);
        self
    }

    /// Run the filter for `request`.
    ///
    /// A failure is always routed with `resource_method_known = false`: the
    /// filter runs before the router has matched a resource method, so there
    /// is none whose exception mappers could apply.
    #[tracing::instrument(skip_all, fields(request_id = %request.request_id()))]
    pub fn handle(&self, request: Arc<dyn RequestContext>) -> Dispatch {
        let filter = Arc::clone(&self.filter);
        let target = Arc::clone(&request);

        self.core.suspend_and_launch(
            request,
            move || filter.filter(target),
            |request, outcome| match outcome {
                FilterOutcome::Continue => {}
                FilterOutcome::Abort(body) => {
                    tracing::debug!(request_id = %request.request_id(), "Request filter aborted the request");
                    request.set_result(body);
                }
            },
        )
    }
}

/// Runs a [`SuspendableResponseFilter`] on the in-flight response.
///
/// Failures are reported with `resource_method_known = true`; the result slot
/// is never touched.
pub struct ResponseFilterBridge {
    core: BridgeCore,
    filter: Arc<dyn SuspendableResponseFilter>,
}

impl ResponseFilterBridge {
    /// Build a bridge around `filter`.
    #[must_use]
    pub fn new(
        tasks: Arc<TaskScope>,
        scope_manager: Arc<dyn RequestScopeManager>,
        filter: Arc<dyn SuspendableResponseFilter>,
    ) -> Self {
        Self {
            core: BridgeCore::new(tasks, scope_manager, Stage::ResponseFilter),
            filter,
        }
    }

    /// Override the execution identity installed into this bridge's tasks.
    #[must_use]
    pub fn with_identity(mut self, identity: ExecutionIdentity) -> Self {
        self.core.set_identity(identity);
        self
    }

    /// Run the filter for `request` and its `response`.
    #[tracing::instrument(skip_all, fields(request_id = %request.request_id()))]
    pub fn handle(
        &self,
        request: Arc<dyn RequestContext>,
        response: Arc<dyn ResponseContext>,
    ) -> Dispatch {
        let filter = Arc::clone(&self.filter);
        let target = Arc::clone(&request);

        self.core.suspend_and_launch(
            request,
            move || filter.filter(target, response),
            |_request, ()| {},
        )
    }
}

impl std::fmt::Debug for RequestFilterBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestFilterBridge")
            .field("identity", self.core.identity())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ResponseFilterBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFilterBridge")
            .field("identity", self.core.identity())
            .finish_non_exhaustive()
    }
}
