//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for all bridge components:
//! - Task scope (launches, settlements, live tasks)
//! - Event-loop dispatch (continuations scheduled, dropped, refused)
//! - Invocations (outcome per stage, cancellations, handler latency)
//! - Stream adapter (elements published, terminal signals)
//!
//! # Example
//!
//! ```rust,no_run
//! use suspend_bridge_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder handle.
///
/// Installs the global recorder and renders the scrape payload; serving it
/// over HTTP is left to the host's own server at `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the host exposes `/metrics` on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all bridge metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Task scope
    describe_counter!(
        "bridge_tasks_launched_total",
        "Total number of request tasks launched on the task scope"
    );
    describe_counter!(
        "bridge_tasks_settled_total",
        "Total number of request tasks that finished or were dropped"
    );
    describe_gauge!("bridge_tasks_live", "Request tasks launched and not yet settled");
    describe_histogram!(
        "bridge_task_duration_seconds",
        "Time from launch until a task settles"
    );

    // Dispatch
    describe_counter!(
        "bridge_continuations_dispatched_total",
        "Continuations handed to a dispatcher"
    );
    describe_counter!(
        "bridge_continuations_dropped_total",
        "Continuations dropped without running (executor closed or refused)"
    );
    describe_counter!(
        "bridge_scope_activations_refused_total",
        "Continuations skipped because the request scope was already active"
    );

    // Invocations
    describe_counter!(
        "bridge_invocations_total",
        "Bridged invocations by stage and final state"
    );
    describe_counter!(
        "bridge_cancellations_total",
        "Invocations cancelled by a connection close"
    );
    describe_histogram!(
        "bridge_handler_duration_seconds",
        "Time spent inside the handler or filter body"
    );

    // Streams
    describe_counter!(
        "bridge_stream_elements_total",
        "Elements delivered to stream subscribers"
    );
    describe_counter!(
        "bridge_streams_terminated_total",
        "Stream subscriptions ended, by reason"
    );
}

/// Task scope metrics recorder.
pub struct TaskMetrics;

impl TaskMetrics {
    /// Record a task launch.
    pub fn record_launch() {
        counter!("bridge_tasks_launched_total").increment(1);
        gauge!("bridge_tasks_live").increment(1.0);
    }

    /// Record a task settling.
    pub fn record_settle(duration: Duration) {
        counter!("bridge_tasks_settled_total").increment(1);
        gauge!("bridge_tasks_live").decrement(1.0);
        histogram!("bridge_task_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a continuation handed to a dispatcher.
    pub fn record_dispatch() {
        counter!("bridge_continuations_dispatched_total").increment(1);
    }

    /// Record a continuation dropped without running.
    pub fn record_drop() {
        counter!("bridge_continuations_dropped_total").increment(1);
    }

    /// Record a refused scope activation.
    pub fn record_refused() {
        counter!("bridge_scope_activations_refused_total").increment(1);
    }
}

/// Invocation metrics recorder.
pub struct InvocationMetrics;

impl InvocationMetrics {
    /// Record the final state of an invocation.
    pub fn record_outcome(stage: &'static str, state: &'static str, duration: Duration) {
        counter!("bridge_invocations_total", "stage" => stage, "state" => state).increment(1);
        histogram!("bridge_handler_duration_seconds", "stage" => stage)
            .record(duration.as_secs_f64());
    }

    /// Record a cancellation triggered by a connection close.
    pub fn record_cancellation() {
        counter!("bridge_cancellations_total").increment(1);
    }
}

/// Stream adapter metrics recorder.
pub struct StreamMetrics;

impl StreamMetrics {
    /// Record one element delivered.
    pub fn record_element() {
        counter!("bridge_stream_elements_total").increment(1);
    }

    /// Record how a subscription ended.
    pub fn record_terminal(reason: &'static str) {
        counter!("bridge_streams_terminated_total", "reason" => reason).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        TaskMetrics::record_launch();
        TaskMetrics::record_settle(Duration::from_millis(15));
        InvocationMetrics::record_outcome("invocation", "completed", Duration::from_millis(5));
        StreamMetrics::record_terminal("complete");

        // A recorder installed by an earlier test leaves this server without a handle
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("bridge_tasks_launched_total"));
            assert!(rendered.contains("bridge_invocations_total"));
            assert!(rendered.contains("bridge_streams_terminated_total"));
        }
    }

    #[test]
    fn recorders_are_noops_without_recorder() {
        DispatchMetrics::record_dispatch();
        DispatchMetrics::record_drop();
        DispatchMetrics::record_refused();
        InvocationMetrics::record_cancellation();
        StreamMetrics::record_element();
    }
}
