//! The host's single-threaded execution context.
//!
//! Request-scoped state and connection state are only safe to touch from the
//! connection's own event loop. A [`HostExecutor`] exposes that loop's "run on
//! this context" primitive and owns the [`CurrentRequest`] slot that replaces
//! thread-local "current request" lookups.

use crate::context::{RequestContext, RequestId};
use crate::error::BridgeError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Unit of work scheduled onto a host executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A connection's event loop as seen by the bridge.
pub trait HostExecutor: Send + Sync + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Queue `job` to run on this context.
    ///
    /// Implementations must never run the job inline on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ExecutorClosed`] if the context no longer accepts
    /// work; the job is dropped.
    fn run_on_context(&self, job: Job) -> Result<(), BridgeError>;

    /// The slot naming the request whose continuation is currently running.
    fn current_request(&self) -> &CurrentRequest;
}

/// Holds the request whose continuation currently runs on an executor.
///
/// Entered and left by the dispatcher around every continuation, so a
/// dependency lookup made from handler code always sees exactly one request.
#[derive(Default)]
pub struct CurrentRequest {
    slot: Mutex<Option<Arc<dyn RequestContext>>>,
}

impl CurrentRequest {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `request` current until the returned guard is dropped.
    ///
    /// The previously current request (normally none) is restored on drop.
    pub fn enter(&self, request: Arc<dyn RequestContext>) -> CurrentRequestGuard<'_> {
        let previous = self.lock().replace(request);
        CurrentRequestGuard {
            owner: self,
            previous,
        }
    }

    /// The request currently entered, if any.
    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn RequestContext>> {
        self.lock().clone()
    }

    /// Identifier of the request currently entered, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.lock().as_ref().map(|request| request.request_id())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn RequestContext>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CurrentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentRequest")
            .field("request_id", &self.request_id())
            .finish()
    }
}

/// Restores the previous current request when dropped.
#[must_use = "the request stops being current as soon as the guard is dropped"]
pub struct CurrentRequestGuard<'a> {
    owner: &'a CurrentRequest,
    previous: Option<Arc<dyn RequestContext>>,
}

impl Drop for CurrentRequestGuard<'_> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        *self.owner.lock() = previous;
    }
}
