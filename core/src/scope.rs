//! Request-scope hooks into the host's dependency-injection container.

use crate::context::{RequestContext, RequestId};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Frozen request-scoped container state for one request.
///
/// The state itself is opaque to the bridge; only the container that produced
/// it knows how to re-activate it.
#[derive(Clone)]
pub struct ScopeSnapshot {
    request_id: RequestId,
    state: Arc<dyn Any + Send + Sync>,
}

impl ScopeSnapshot {
    /// Wrap container state captured for `request_id`.
    #[must_use]
    pub fn new<S>(request_id: RequestId, state: S) -> Self
    where
        S: Any + Send + Sync,
    {
        Self {
            request_id,
            state: Arc::new(state),
        }
    }

    /// The request this snapshot belongs to.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Borrow the container state as its concrete type.
    #[must_use]
    pub fn state<S: Any>(&self) -> Option<&S> {
        self.state.downcast_ref::<S>()
    }
}

impl fmt::Debug for ScopeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeSnapshot")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// The DI container's request-scope manager.
///
/// `capture` runs once, on the original request thread, before the pipeline
/// suspends. `activate`/`deactivate` are always called in strictly nested
/// pairs around each resumption.
pub trait RequestScopeManager: Send + Sync + 'static {
    /// Snapshot the request-scoped state that is active for `request`.
    fn capture(&self, request: &dyn RequestContext) -> ScopeSnapshot;

    /// Make `snapshot` the active request scope.
    fn activate(&self, snapshot: &ScopeSnapshot);

    /// Undo the matching [`activate`](RequestScopeManager::activate).
    fn deactivate(&self, snapshot: &ScopeSnapshot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Beans {
        user: &'static str,
    }

    #[test]
    fn snapshot_downcasts_to_captured_state() {
        let snapshot = ScopeSnapshot::new(RequestId::new(3), Beans { user: "alice" });

        assert_eq!(snapshot.request_id(), RequestId::new(3));
        assert_eq!(snapshot.state::<Beans>(), Some(&Beans { user: "alice" }));
        assert!(snapshot.state::<String>().is_none());
    }

    #[test]
    fn clones_share_state() {
        let snapshot = ScopeSnapshot::new(RequestId::new(1), 5_u32);
        let copy = snapshot.clone();
        assert_eq!(copy.state::<u32>(), Some(&5));
    }
}
