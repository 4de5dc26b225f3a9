//! Request-scope activation stays balanced and never interleaves between
//! requests, whatever the handlers do.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Harness, SETTLE};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use suspend_bridge_core::{HandlerOutput, HostExecutor, RequestId};
use suspend_bridge_runtime::{
    CapturedScope, EventLoop, EventLoopDispatcher, InvocationBridge, InvocationState, TaskScope,
};
use suspend_bridge_testing::{
    MockRequestContext, RecordingScopeManager, ScopeEvent, invoker, suspend_times,
};

async fn run_with_suspensions(suspensions: usize) -> (Arc<RecordingScopeManager>, InvocationState) {
    let harness = Harness::new();
    let bridge = harness.invocation(invoker("Loop#get", move |_instance, _params| async move {
        suspend_times(suspensions).await;
        Ok(HandlerOutput::NoContent)
    }));
    let request = Arc::new(harness.request(1));

    let dispatch = bridge.handle(request.clone());
    let state = dispatch.handle().expect("dispatched").settled().await;
    harness.event_loop.barrier().await.unwrap();

    (Arc::clone(&harness.scopes), state)
}

#[tokio::test]
async fn n_suspensions_give_n_plus_one_balanced_activations() {
    for suspensions in [0, 1, 5, 20] {
        let (scopes, state) = run_with_suspensions(suspensions).await;
        let id = RequestId::new(1);

        assert_eq!(state, InvocationState::Completed);
        assert_eq!(scopes.activations(id), suspensions + 1);
        assert_eq!(scopes.deactivations(id), suspensions + 1);
        assert!(scopes.is_strictly_paired(id));
        assert_eq!(scopes.active_count(), 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn activations_balance_for_any_suspension_count(suspensions in 0usize..40) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (scopes, state) = runtime.block_on(run_with_suspensions(suspensions));
        let id = RequestId::new(1);

        prop_assert_eq!(state, InvocationState::Completed);
        prop_assert_eq!(scopes.activations(id), scopes.deactivations(id));
        prop_assert_eq!(scopes.activations(id), suspensions + 1);
        prop_assert!(scopes.is_strictly_paired(id));
    }
}

#[tokio::test]
async fn panicking_continuation_still_deactivates() {
    let harness = Harness::new();
    let request: Arc<MockRequestContext> = Arc::new(harness.request(2));
    let scope = Arc::new(CapturedScope::capture(
        Arc::clone(&harness.scopes) as _,
        request.as_ref(),
    ));
    let dispatcher = Arc::new(EventLoopDispatcher::new(request.clone(), scope));

    // Launched without the bridge, so nothing catches the panic before the task cell
    let handle = harness
        .tasks
        .launch(dispatcher, |_token| async {
            suspend_times(2).await;
            if true {
                panic!("continuation failed");
            }
        })
        .expect("launch");

    assert!(handle.wait_with_timeout(SETTLE).await);
    harness.event_loop.barrier().await.unwrap();

    let id = RequestId::new(2);
    assert_eq!(harness.scopes.activations(id), 3);
    assert_eq!(harness.scopes.deactivations(id), 3);
    assert!(harness.scopes.is_strictly_paired(id));
    assert_eq!(harness.event_loop.current_request().request_id(), None);
}

#[tokio::test]
async fn concurrent_requests_on_one_loop_never_interleave_scopes() {
    let harness = Harness::new();
    let event_loop = Arc::clone(&harness.event_loop);
    let scopes = Arc::clone(&harness.scopes);
    let violations = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&violations);

    let bridge = harness.invocation(invoker("Chatty#get", move |_instance, params| {
        let event_loop = Arc::clone(&event_loop);
        let scopes = Arc::clone(&scopes);
        let violations = Arc::clone(&seen);
        let own = RequestId::new(params[0].as_u64().unwrap_or(0));
        async move {
            for _ in 0..6 {
                let isolated = scopes.active_count() == 1
                    && scopes.is_active(own)
                    && event_loop.current_request().request_id() == Some(own);
                if !isolated {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                suspend_times(1).await;
            }
            Ok(HandlerOutput::NoContent)
        }
    }));

    let first = Arc::new(harness.request(10).with_parameters(vec![10.into()]));
    let second = Arc::new(harness.request(20).with_parameters(vec![20.into()]));
    let a = bridge.handle(first.clone());
    let b = bridge.handle(second.clone());

    assert_eq!(a.handle().expect("a").settled().await, InvocationState::Completed);
    assert_eq!(b.handle().expect("b").settled().await, InvocationState::Completed);
    harness.event_loop.barrier().await.unwrap();

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(harness.scopes.max_concurrent(), 1);
    assert!(harness.scopes.is_strictly_paired(RequestId::new(10)));
    assert!(harness.scopes.is_strictly_paired(RequestId::new(20)));

    // The two requests really did interleave on the loop
    let activations: Vec<RequestId> = harness
        .scopes
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ScopeEvent::Activated(id) => Some(id),
            _ => None,
        })
        .collect();
    assert!(activations.windows(2).any(|pair| pair[0] != pair[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requests_on_separate_loops_keep_their_own_scope() {
    let tasks = Arc::new(TaskScope::new());
    let scopes = Arc::new(RecordingScopeManager::new());
    let loops = [EventLoop::spawn("connection-a"), EventLoop::spawn("connection-b")];
    let violations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    let mut requests = Vec::new();
    for (index, event_loop) in loops.iter().enumerate() {
        let own = RequestId::new(100 + index as u64);
        let loop_handle = Arc::clone(event_loop);
        let scope_log = Arc::clone(&scopes);
        let counter = Arc::clone(&violations);

        let bridge = InvocationBridge::new(
            Arc::clone(&tasks),
            Arc::clone(&scopes) as _,
            invoker("Parallel#get", move |_instance, _params| {
                let loop_handle = Arc::clone(&loop_handle);
                let scope_log = Arc::clone(&scope_log);
                let counter = Arc::clone(&counter);
                async move {
                    for _ in 0..20 {
                        let isolated = loop_handle.in_context()
                            && loop_handle.current_request().request_id() == Some(own)
                            && scope_log.is_active(own);
                        if !isolated {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::task::yield_now().await;
                    }
                    Ok(HandlerOutput::NoContent)
                }
            }),
        );

        let request = Arc::new(MockRequestContext::new(own.value(), Arc::clone(event_loop) as _));
        let dispatch = bridge.handle(request.clone());
        handles.push(dispatch.handle().expect("dispatched").clone());
        requests.push(request);
    }

    for handle in &handles {
        assert_eq!(handle.settled().await, InvocationState::Completed);
    }
    for event_loop in &loops {
        event_loop.barrier().await.unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    for request in &requests {
        assert_eq!(request.resume_count(), 1);
        assert!(scopes.is_strictly_paired(suspend_bridge_core::RequestContext::request_id(
            request.as_ref()
        )));
    }
}
