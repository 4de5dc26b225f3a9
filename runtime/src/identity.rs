//! Execution identity for request tasks.
//!
//! In development mode the application can be hot-reloaded while request tasks
//! are suspended. Each bridge captures the identity of the deployment that
//! built it and installs it as a task-local for every poll of its tasks, so a
//! task resumed after a reload still runs as the deployment that started it.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static IDENTITY: ExecutionIdentity;
}

/// Name and reload generation of the deployment a task belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionIdentity {
    name: Arc<str>,
    generation: u64,
}

impl ExecutionIdentity {
    /// Create an identity.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, generation: u64) -> Self {
        Self {
            name: name.into(),
            generation,
        }
    }

    /// Deployment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reload generation; bumped on every hot reload.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Identity of the next hot-reload generation of the same deployment.
    #[must_use]
    pub fn reloaded(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            generation: self.generation.saturating_add(1),
        }
    }
}

impl Default for ExecutionIdentity {
    fn default() -> Self {
        Self::new("application", 0)
    }
}

/// The identity of the task currently being polled, if it was launched by a
/// bridge.
#[must_use]
pub fn current() -> Option<ExecutionIdentity> {
    IDENTITY.try_with(Clone::clone).ok()
}

/// Run `future` with `identity` installed for every poll.
pub(crate) fn scope<F>(identity: ExecutionIdentity, future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    IDENTITY.scope(identity, future)
}
