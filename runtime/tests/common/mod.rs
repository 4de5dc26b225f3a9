//! Shared fixtures for the runtime integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use suspend_bridge_core::EndpointInvoker;
use suspend_bridge_runtime::{BridgeConfig, EventLoop, InvocationBridge, TaskScope};
use suspend_bridge_testing::{MockRequestContext, RecordingScopeManager, init_test_tracing};

/// Generous bound for anything that should happen "soon".
pub const SETTLE: Duration = Duration::from_secs(2);

/// A task scope, a recording scope manager, and one event loop.
pub struct Harness {
    pub tasks: Arc<TaskScope>,
    pub scopes: Arc<RecordingScopeManager>,
    pub event_loop: Arc<EventLoop>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        init_test_tracing();
        Self {
            tasks: Arc::new(TaskScope::with_config(config)),
            scopes: Arc::new(RecordingScopeManager::new()),
            event_loop: EventLoop::spawn("connection-0"),
        }
    }

    pub fn invocation(&self, invoker: Arc<dyn EndpointInvoker>) -> InvocationBridge {
        InvocationBridge::new(Arc::clone(&self.tasks), Arc::clone(&self.scopes) as _, invoker)
    }

    pub fn request(&self, id: u64) -> MockRequestContext {
        MockRequestContext::new(id, Arc::clone(&self.event_loop) as _)
    }
}
