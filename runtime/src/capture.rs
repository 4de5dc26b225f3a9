//! Request-scope capture and activation.
//!
//! The container's request scope is normally bound to the thread running the
//! request. Once the pipeline suspends, resumptions may land on any thread of
//! the event loop, so the scope is snapshotted once up front and explicitly
//! re-activated around every resumption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use suspend_bridge_core::{
    BridgeError, RequestContext, RequestId, RequestScopeManager, ScopeSnapshot,
};

/// A request scope captured before the host pipeline suspended.
///
/// Owned by one request task for its whole lifetime.
pub struct CapturedScope {
    manager: Arc<dyn RequestScopeManager>,
    snapshot: ScopeSnapshot,
    active: AtomicBool,
    activations: AtomicU64,
}

impl CapturedScope {
    /// Snapshot the current request scope of `request`.
    ///
    /// Must be called on the request's event loop, before `suspend`.
    #[must_use]
    pub fn capture(manager: Arc<dyn RequestScopeManager>, request: &dyn RequestContext) -> Self {
        let snapshot = manager.capture(request);
        tracing::trace!(request_id = %snapshot.request_id(), "Request scope captured");
        Self {
            manager,
            snapshot,
            active: AtomicBool::new(false),
            activations: AtomicU64::new(0),
        }
    }

    /// Make the captured scope current until the returned guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ScopeAlreadyActive`] if a previous activation
    /// is still live; the manager is not called in that case.
    pub fn activate(&self) -> Result<ScopeActivation<'_>, BridgeError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::ScopeAlreadyActive(self.request_id()));
        }

        self.manager.activate(&self.snapshot);
        self.activations.fetch_add(1, Ordering::Relaxed);
        Ok(ScopeActivation { scope: self })
    }

    /// The request this scope belongs to.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.snapshot.request_id()
    }

    /// The captured snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> &ScopeSnapshot {
        &self.snapshot
    }

    /// Whether an activation guard is currently live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// How many times the scope has been activated so far.
    #[must_use]
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CapturedScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedScope")
            .field("request_id", &self.request_id())
            .field("active", &self.is_active())
            .field("activations", &self.activations())
            .finish_non_exhaustive()
    }
}

/// Deactivates the captured scope on drop, including during unwinding.
#[must_use = "the scope is deactivated as soon as the guard is dropped"]
pub struct ScopeActivation<'a> {
    scope: &'a CapturedScope,
}

impl Drop for ScopeActivation<'_> {
    fn drop(&mut self) {
        self.scope.manager.deactivate(&self.scope.snapshot);
        self.scope.active.store(false, Ordering::Release);
    }
}
