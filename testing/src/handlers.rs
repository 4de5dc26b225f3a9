//! Closure-backed invokers and filters, plus deterministic suspension points.

#![allow(clippy::module_name_repetitions)]

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use suspend_bridge_core::{
    EndpointInstance, EndpointInvoker, FilterOutcome, HandlerError, HandlerFuture,
    HandlerOutput, Parameters, RequestContext, ResponseContext, SuspendableInvoker,
    SuspendableRequestFilter, SuspendableResponseFilter,
};

type InvokeFn = dyn Fn(EndpointInstance, Parameters) -> HandlerFuture + Send + Sync;

/// Suspendable invoker running a closure.
pub struct FnInvoker {
    name: String,
    invoke: Box<InvokeFn>,
}

impl EndpointInvoker for FnInvoker {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_suspendable(self: Arc<Self>) -> Option<Arc<dyn SuspendableInvoker>> {
        Some(self)
    }
}

impl SuspendableInvoker for FnInvoker {
    fn invoke(&self, instance: EndpointInstance, parameters: Parameters) -> HandlerFuture {
        (self.invoke)(instance, parameters)
    }
}

/// Build a suspendable invoker from an async closure.
///
/// # Example
///
/// ```ignore
/// let hello = invoker("Greeting#hello", |_instance, params| async move {
///     suspend_times(2).await;
///     Ok(HandlerOutput::value(format!("hello {}", params[0])))
/// });
/// ```
pub fn invoker<F, Fut>(name: impl Into<String>, handler: F) -> Arc<FnInvoker>
where
    F: Fn(EndpointInstance, Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutput, HandlerError>> + Send + 'static,
{
    Arc::new(FnInvoker {
        name: name.into(),
        invoke: Box::new(move |instance, parameters| handler(instance, parameters).boxed()),
    })
}

/// An invoker generated for a handler that cannot suspend.
#[derive(Debug)]
pub struct BlockingInvoker {
    name: String,
}

impl BlockingInvoker {
    /// A blocking invoker with the given endpoint name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }
}

impl EndpointInvoker for BlockingInvoker {
    fn name(&self) -> &str {
        &self.name
    }
}

type RequestFilterFn = dyn Fn(Arc<dyn RequestContext>) -> BoxFuture<'static, Result<FilterOutcome, HandlerError>>
    + Send
    + Sync;

/// Request filter running a closure.
pub struct FnRequestFilter {
    filter: Box<RequestFilterFn>,
}

impl SuspendableRequestFilter for FnRequestFilter {
    fn filter(
        &self,
        request: Arc<dyn RequestContext>,
    ) -> BoxFuture<'static, Result<FilterOutcome, HandlerError>> {
        (self.filter)(request)
    }
}

/// Build a request filter from an async closure.
pub fn request_filter<F, Fut>(filter: F) -> Arc<FnRequestFilter>
where
    F: Fn(Arc<dyn RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FilterOutcome, HandlerError>> + Send + 'static,
{
    Arc::new(FnRequestFilter {
        filter: Box::new(move |request| filter(request).boxed()),
    })
}

type ResponseFilterFn = dyn Fn(Arc<dyn RequestContext>, Arc<dyn ResponseContext>) -> BoxFuture<'static, Result<(), HandlerError>>
    + Send
    + Sync;

/// Response filter running a closure.
pub struct FnResponseFilter {
    filter: Box<ResponseFilterFn>,
}

impl SuspendableResponseFilter for FnResponseFilter {
    fn filter(
        &self,
        request: Arc<dyn RequestContext>,
        response: Arc<dyn ResponseContext>,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        (self.filter)(request, response)
    }
}

/// Build a response filter from an async closure.
pub fn response_filter<F, Fut>(filter: F) -> Arc<FnResponseFilter>
where
    F: Fn(Arc<dyn RequestContext>, Arc<dyn ResponseContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnResponseFilter {
        filter: Box::new(move |request, response| filter(request, response).boxed()),
    })
}

/// A future that suspends exactly once, waking itself immediately.
///
/// Each await costs the task exactly one extra resumption.
#[derive(Debug, Default)]
pub struct YieldOnce {
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Suspend `n` times.
pub async fn suspend_times(n: usize) {
    for _ in 0..n {
        YieldOnce::default().await;
    }
}
