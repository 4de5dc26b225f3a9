//! The suspend/launch/resume protocol and the invocation bridge.
//!
//! Every bridge stage follows the same protocol, implemented once by
//! [`BridgeCore`]:
//!
//! 1. suspend the host pipeline
//! 2. capture the request scope
//! 3. launch the body on the [`TaskScope`] with an [`EventLoopDispatcher`]
//! 4. wire connection close to task cancellation
//! 5. when the body settles, deliver (and resume) or abort (and close)
//!
//! [`InvocationBridge`] is the stage that calls the user's handler.

use crate::capture::CapturedScope;
use crate::completion::{Completion, InvocationState, wire_cancellation};
use crate::dispatcher::EventLoopDispatcher;
use crate::identity::{self, ExecutionIdentity};
use crate::metrics::InvocationMetrics;
use crate::scope::{TaskHandle, TaskScope};
use crate::stream::StreamPublisher;
use crate::task::panic_message;
use futures::FutureExt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use suspend_bridge_core::{
    BridgeError, EndpointInvoker, HandlerError, HandlerOutput, InvokerKind, RequestContext,
    RequestScopeManager, ResponseBody,
};
use tokio_util::sync::CancellationToken;

/// Which handler-chain stage a bridge serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Invocation,
    RequestFilter,
    ResponseFilter,
}

impl Stage {
    /// Whether the host's matched resource method is still the target when
    /// a failure is routed to its exception mappers.
    pub(crate) const fn resource_method_known(self) -> bool {
        match self {
            Self::Invocation | Self::ResponseFilter => true,
            Self::RequestFilter => false,
        }
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Invocation => "invocation",
            Self::RequestFilter => "request_filter",
            Self::ResponseFilter => "response_filter",
        }
    }
}

/// What a bridge did with a request.
#[derive(Debug)]
pub enum Dispatch {
    /// A prior stage already produced the response; nothing was done.
    Skipped,

    /// The request was answered with an error without running the body.
    Rejected,

    /// The pipeline is suspended and a task is running the body.
    Dispatched(InvocationHandle),
}

impl Dispatch {
    /// The running invocation, if one was dispatched.
    #[must_use]
    pub const fn handle(&self) -> Option<&InvocationHandle> {
        match self {
            Self::Dispatched(handle) => Some(handle),
            Self::Skipped | Self::Rejected => None,
        }
    }

    /// Whether a task was launched.
    #[must_use]
    pub const fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched(_))
    }
}

/// Observer of one dispatched invocation.
#[derive(Debug, Clone)]
pub struct InvocationHandle {
    completion: Arc<Completion>,
    task: TaskHandle,
}

impl InvocationHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InvocationState {
        self.completion.state()
    }

    /// The task running the body.
    #[must_use]
    pub const fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// Wait until the task settles and return the final state.
    pub async fn settled(&self) -> InvocationState {
        self.task.settled().await;
        self.state()
    }

    /// Wait up to `timeout`; `None` if the task is still running.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> Option<InvocationState> {
        if self.task.wait_with_timeout(timeout).await {
            Some(self.state())
        } else {
            None
        }
    }
}

/// The protocol shared by the invocation and filter bridges.
pub(crate) struct BridgeCore {
    tasks: Arc<TaskScope>,
    scope_manager: Arc<dyn RequestScopeManager>,
    identity: ExecutionIdentity,
    stage: Stage,
}

impl BridgeCore {
    pub(crate) fn new(
        tasks: Arc<TaskScope>,
        scope_manager: Arc<dyn RequestScopeManager>,
        stage: Stage,
    ) -> Self {
        let identity = tasks.config().identity.clone();
        Self {
            tasks,
            scope_manager,
            identity,
            stage,
        }
    }

    pub(crate) fn set_identity(&mut self, identity: ExecutionIdentity) {
        self.identity = identity;
    }

    pub(crate) const fn identity(&self) -> &ExecutionIdentity {
        &self.identity
    }

    /// Suspend `request`, run `body` as a task, and settle the request with
    /// its outcome. `deliver` stores a successful outcome before resuming.
    ///
    /// Must be called on the request's event loop.
    pub(crate) fn suspend_and_launch<B, Fut, T, D>(
        &self,
        request: Arc<dyn RequestContext>,
        body: B,
        deliver: D,
    ) -> Dispatch
    where
        B: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(&dyn RequestContext, T) + Send + 'static,
    {
        let request_id = request.request_id();
        let stage = self.stage;

        request.suspend();

        let scope = Arc::new(CapturedScope::capture(
            Arc::clone(&self.scope_manager),
            request.as_ref(),
        ));
        let dispatcher = Arc::new(EventLoopDispatcher::new(Arc::clone(&request), scope));
        let completion = Arc::new(Completion::new());
        completion.mark_dispatched();

        let identity = self.identity.clone();
        let task_request = Arc::clone(&request);
        let task_completion = Arc::clone(&completion);

        let launched = self.tasks.launch(dispatcher, move |token| {
            identity::scope(identity, async move {
                let started = Instant::now();
                let outcome = run_body(token, body).await;
                settle(
                    task_request.as_ref(),
                    &task_completion,
                    stage,
                    outcome,
                    deliver,
                );
                InvocationMetrics::record_outcome(
                    stage.as_str(),
                    task_completion.state().as_str(),
                    started.elapsed(),
                );
            })
        });

        match launched {
            Ok(task) => {
                wire_cancellation(request.as_ref(), Arc::clone(&completion), task.clone());
                tracing::debug!(
                    request_id = %request_id,
                    task_id = %task.id(),
                    stage = stage.as_str(),
                    "Pipeline suspended; task dispatched"
                );
                Dispatch::Dispatched(InvocationHandle { completion, task })
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %request_id,
                    %error,
                    stage = stage.as_str(),
                    "Could not launch task"
                );
                completion.try_fail();
                request.handle_exception(error, stage.resource_method_known());
                request.resume();
                Dispatch::Rejected
            }
        }
    }
}

/// How a body's task ended.
#[derive(Debug)]
enum BodyOutcome<T> {
    /// The body ran to completion, successfully or not.
    Finished(Result<T, HandlerError>),

    /// The task's token fired before the body finished.
    Interrupted,
}

/// Run `body` until it finishes, panics, or `token` is cancelled.
async fn run_body<B, Fut, T>(token: CancellationToken, body: B) -> BodyOutcome<T>
where
    B: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, HandlerError>>,
{
    let guarded = async move {
        let future = catch_unwind(AssertUnwindSafe(body))
            .map_err(|payload| HandlerError::Panicked(panic_message(payload.as_ref())))?;
        AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
    };

    tokio::select! {
        biased;
        () = token.cancelled() => BodyOutcome::Interrupted,
        outcome = guarded => BodyOutcome::Finished(outcome),
    }
}

/// Act on the body's outcome, unless cancellation already won.
///
/// Only an interrupted task settles as cancelled. A body that returns
/// [`HandlerError::Cancelled`] on its own has failed like any other error.
fn settle<T, D>(
    request: &dyn RequestContext,
    completion: &Completion,
    stage: Stage,
    outcome: BodyOutcome<T>,
    deliver: D,
) where
    D: FnOnce(&dyn RequestContext, T),
{
    let request_id = request.request_id();

    match outcome {
        BodyOutcome::Finished(Ok(value)) => {
            if completion.try_complete() {
                deliver(request, value);
                tracing::debug!(request_id = %request_id, stage = stage.as_str(), "Completed; resuming pipeline");
                request.resume();
            } else {
                tracing::debug!(request_id = %request_id, "Finished after cancellation; discarding result");
                request.close_connection();
            }
        }
        BodyOutcome::Finished(Err(error)) => {
            if completion.try_fail() {
                tracing::debug!(request_id = %request_id, %error, stage = stage.as_str(), "Failed; routing to exception mappers");
                request.handle_exception(BridgeError::Handler(error), stage.resource_method_known());
                request.resume();
            } else {
                tracing::debug!(request_id = %request_id, %error, "Failed after cancellation; discarding error");
                request.close_connection();
            }
        }
        BodyOutcome::Interrupted => {
            completion.try_cancel();
            tracing::debug!(request_id = %request_id, stage = stage.as_str(), "Cancelled; closing connection");
            request.close_connection();
        }
    }
}

/// The handler-chain stage that runs a suspendable handler.
///
/// Built once per endpoint at application startup; [`handle`](Self::handle)
/// is then called for every matching request.
///
/// # Example
///
/// ```ignore
/// let bridge = InvocationBridge::new(Arc::clone(&tasks), scope_manager, invoker);
///
/// match bridge.handle(request) {
///     Dispatch::Dispatched(handle) => tracing::debug!(state = %handle.state()),
///     Dispatch::Skipped | Dispatch::Rejected => {}
/// }
/// ```
pub struct InvocationBridge {
    core: BridgeCore,
    invoker: InvokerKind,
}

impl InvocationBridge {
    /// Build a bridge for one endpoint.
    ///
    /// The invoker's suspend capability is checked here, once. An invoker
    /// without it makes every request fail with
    /// [`BridgeError::InvalidWiring`].
    #[must_use]
    pub fn new(
        tasks: Arc<TaskScope>,
        scope_manager: Arc<dyn RequestScopeManager>,
        invoker: Arc<dyn EndpointInvoker>,
    ) -> Self {
        let invoker = InvokerKind::check(invoker);
        if let InvokerKind::InvalidWiring { invoker } = &invoker {
            tracing::warn!(invoker, "Endpoint invoker cannot suspend; requests will be rejected");
        }
        Self {
            core: BridgeCore::new(tasks, scope_manager, Stage::Invocation),
            invoker,
        }
    }

    /// Override the execution identity installed into this bridge's tasks.
    #[must_use]
    pub fn with_identity(mut self, identity: ExecutionIdentity) -> Self {
        self.core.set_identity(identity);
        self
    }

    /// The identity installed into this bridge's tasks.
    #[must_use]
    pub const fn identity(&self) -> &ExecutionIdentity {
        self.core.identity()
    }

    /// The invoker capability decided at construction.
    #[must_use]
    pub const fn invoker_kind(&self) -> &InvokerKind {
        &self.invoker
    }

    /// Run the handler for `request`.
    ///
    /// Called by the host's handler chain on the connection's event loop.
    #[tracing::instrument(skip_all, fields(request_id = %request.request_id()))]
    pub fn handle(&self, request: Arc<dyn RequestContext>) -> Dispatch {
        if request.has_result() {
            tracing::debug!("Response already present; skipping invocation");
            return Dispatch::Skipped;
        }

        let invoker = match &self.invoker {
            InvokerKind::Valid(invoker) => Arc::clone(invoker),
            InvokerKind::InvalidWiring { invoker } => {
                tracing::error!(invoker, "Rejecting request: invoker cannot suspend");
                request.handle_exception(
                    BridgeError::InvalidWiring {
                        invoker: invoker.clone(),
                    },
                    Stage::Invocation.resource_method_known(),
                );
                return Dispatch::Rejected;
            }
        };

        let instance = request.endpoint_instance();
        let parameters = request.parameters();

        self.core.suspend_and_launch(
            request,
            move || invoker.invoke(instance, parameters),
            deliver_output,
        )
    }
}

impl std::fmt::Debug for InvocationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationBridge")
            .field("invoker", &self.invoker)
            .field("identity", self.core.identity())
            .finish_non_exhaustive()
    }
}

fn deliver_output(request: &dyn RequestContext, output: HandlerOutput) {
    match output {
        HandlerOutput::NoContent => {}
        HandlerOutput::Value(value) => request.set_result(ResponseBody::Value(value)),
        HandlerOutput::Stream(stream) => {
            request.set_result(ResponseBody::Stream(Box::new(StreamPublisher::new(stream))));
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn stage_flags() {
        assert!(Stage::Invocation.resource_method_known());
        assert!(Stage::ResponseFilter.resource_method_known());
        assert!(!Stage::RequestFilter.resource_method_known());
    }

    #[tokio::test]
    async fn run_body_returns_value() {
        let outcome = run_body(CancellationToken::new(), || async { Ok::<_, HandlerError>(5) }).await;
        assert!(matches!(outcome, BodyOutcome::Finished(Ok(5))));
    }

    #[tokio::test]
    async fn run_body_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let outcome = run_body(token, || async { Ok::<_, HandlerError>(5) }).await;
        assert!(matches!(outcome, BodyOutcome::Interrupted));
    }

    #[tokio::test]
    async fn run_body_reports_a_returned_cancelled_error_as_finished() {
        let outcome = run_body(CancellationToken::new(), || async {
            Err::<u8, _>(HandlerError::Cancelled)
        })
        .await;

        assert!(matches!(outcome, BodyOutcome::Finished(Err(HandlerError::Cancelled))));
    }

    #[tokio::test]
    async fn run_body_catches_panics_while_polling() {
        let outcome = run_body(CancellationToken::new(), || async {
            if true {
                panic!("handler exploded");
            }
            Ok::<u8, HandlerError>(0)
        })
        .await;

        assert!(matches!(
            outcome,
            BodyOutcome::Finished(Err(HandlerError::Panicked(message))) if message == "handler exploded"
        ));
    }

    #[tokio::test]
    async fn run_body_catches_panics_while_building_the_future() {
        let outcome = run_body(CancellationToken::new(), || -> futures::future::Ready<Result<u8, HandlerError>> {
            panic!("invoker exploded")
        })
        .await;

        assert!(matches!(
            outcome,
            BodyOutcome::Finished(Err(HandlerError::Panicked(message))) if message == "invoker exploded"
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_suspended_body() {
        let token = CancellationToken::new();
        let trigger = token.clone();

        let body = tokio::spawn(run_body(token, || async {
            std::future::pending::<Result<(), HandlerError>>().await
        }));
        tokio::task::yield_now().await;
        trigger.cancel();

        let outcome = body.await.expect("join");
        assert!(matches!(outcome, BodyOutcome::Interrupted));
    }
}
