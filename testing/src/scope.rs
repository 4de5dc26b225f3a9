//! A request-scope manager that records every call.

#![allow(clippy::module_name_repetitions)]

use crate::host::lock;
use std::sync::Mutex;
use suspend_bridge_core::{RequestContext, RequestId, RequestScopeManager, ScopeSnapshot};

/// One call made on a [`RecordingScopeManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEvent {
    /// `capture` for a request
    Captured(RequestId),
    /// `activate` for a request
    Activated(RequestId),
    /// `deactivate` for a request
    Deactivated(RequestId),
}

/// State stored in snapshots produced by [`RecordingScopeManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBeans {
    /// Request the beans belong to
    pub request_id: RequestId,
}

/// [`RequestScopeManager`] that logs calls and tracks which scopes are active.
#[derive(Debug, Default)]
pub struct RecordingScopeManager {
    events: Mutex<Vec<ScopeEvent>>,
    active: Mutex<Vec<RequestId>>,
    max_concurrent: Mutex<usize>,
}

impl RecordingScopeManager {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call log.
    #[must_use]
    pub fn events(&self) -> Vec<ScopeEvent> {
        lock(&self.events).clone()
    }

    /// Calls made for one request, in order.
    #[must_use]
    pub fn events_for(&self, request_id: RequestId) -> Vec<ScopeEvent> {
        lock(&self.events)
            .iter()
            .copied()
            .filter(|event| match event {
                ScopeEvent::Captured(id) | ScopeEvent::Activated(id) | ScopeEvent::Deactivated(id) => {
                    *id == request_id
                }
            })
            .collect()
    }

    /// Number of `activate` calls for a request.
    #[must_use]
    pub fn activations(&self, request_id: RequestId) -> usize {
        self.events_for(request_id)
            .iter()
            .filter(|event| matches!(event, ScopeEvent::Activated(_)))
            .count()
    }

    /// Number of `deactivate` calls for a request.
    #[must_use]
    pub fn deactivations(&self, request_id: RequestId) -> usize {
        self.events_for(request_id)
            .iter()
            .filter(|event| matches!(event, ScopeEvent::Deactivated(_)))
            .count()
    }

    /// Whether a request's activations and deactivations alternate, starting
    /// with an activation and ending deactivated.
    #[must_use]
    pub fn is_strictly_paired(&self, request_id: RequestId) -> bool {
        let mut active = false;
        for event in self.events_for(request_id) {
            match event {
                ScopeEvent::Captured(_) => {}
                ScopeEvent::Activated(_) if !active => active = true,
                ScopeEvent::Deactivated(_) if active => active = false,
                ScopeEvent::Activated(_) | ScopeEvent::Deactivated(_) => return false,
            }
        }
        !active
    }

    /// Whether a request's scope is currently active.
    #[must_use]
    pub fn is_active(&self, request_id: RequestId) -> bool {
        lock(&self.active).contains(&request_id)
    }

    /// Number of scopes active right now.
    #[must_use]
    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Most scopes ever active at the same time.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        *lock(&self.max_concurrent)
    }
}

impl RequestScopeManager for RecordingScopeManager {
    fn capture(&self, request: &dyn RequestContext) -> ScopeSnapshot {
        let request_id = request.request_id();
        lock(&self.events).push(ScopeEvent::Captured(request_id));
        ScopeSnapshot::new(request_id, RequestBeans { request_id })
    }

    fn activate(&self, snapshot: &ScopeSnapshot) {
        let request_id = snapshot.request_id();
        lock(&self.events).push(ScopeEvent::Activated(request_id));

        let mut active = lock(&self.active);
        active.push(request_id);
        let mut max = lock(&self.max_concurrent);
        *max = (*max).max(active.len());
    }

    fn deactivate(&self, snapshot: &ScopeSnapshot) {
        let request_id = snapshot.request_id();
        lock(&self.events).push(ScopeEvent::Deactivated(request_id));

        let mut active = lock(&self.active);
        if let Some(position) = active.iter().rposition(|id| *id == request_id) {
            active.remove(position);
        }
    }
}
