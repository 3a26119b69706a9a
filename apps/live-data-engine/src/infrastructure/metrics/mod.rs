//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Commands**: Engine calls processed, by kind
//! - **Requests**: Requests dispatched, responses delivered, failures by reason
//! - **Correlation**: Responses that matched no pending request
//! - **Streaming**: Data events published or dropped, by kind
//! - **Clients**: Connected data clients and pending requests
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.
//!
//! Gauges are process-wide sums: each engine moves them by its own changes,
//! so several engines in one process add up instead of overwriting.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "live_data_engine_commands_total",
        "Engine commands processed by kind"
    );
    describe_counter!(
        "live_data_engine_requests_total",
        "Requests dispatched to data clients by response shape"
    );
    describe_counter!(
        "live_data_engine_responses_total",
        "Responses delivered to requesters by response shape"
    );
    describe_counter!(
        "live_data_engine_request_failures_total",
        "Requests completed with an error, by reason"
    );
    describe_counter!(
        "live_data_engine_unknown_responses_total",
        "Responses that matched no pending request"
    );
    describe_counter!(
        "live_data_engine_data_published_total",
        "Streaming events published to the data hub by kind"
    );
    describe_counter!(
        "live_data_engine_data_dropped_total",
        "Streaming events dropped for lack of a subscription, by kind"
    );
    describe_gauge!(
        "live_data_engine_pending_requests",
        "Requests awaiting a response, across engines"
    );
    describe_gauge!(
        "live_data_engine_connected_clients",
        "Data clients currently connected, across engines"
    );
    describe_gauge!(
        "live_data_engine_running",
        "Engine dispatch loops currently running"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a request completes with an error.
#[derive(Debug, Clone, Copy)]
pub enum FailureReason {
    /// The client reported a failure.
    ClientFailure,
    /// The client disconnected first.
    Disconnected,
    /// The client answered with the wrong payload shape.
    UnexpectedResponse,
    /// The engine was disposed.
    Disposed,
    /// Dispatch to the client failed.
    DispatchFailed,
}

impl FailureReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ClientFailure => "client_failure",
            Self::Disconnected => "disconnected",
            Self::UnexpectedResponse => "unexpected_response",
            Self::Disposed => "disposed",
            Self::DispatchFailed => "dispatch_failed",
        }
    }
}

/// Record a processed command.
pub fn record_command(kind: &'static str) {
    counter!("live_data_engine_commands_total", "kind" => kind).increment(1);
}

/// Record a dispatched request.
pub fn record_request(shape: &'static str) {
    counter!("live_data_engine_requests_total", "shape" => shape).increment(1);
}

/// Record a delivered response.
pub fn record_response(shape: &'static str) {
    counter!("live_data_engine_responses_total", "shape" => shape).increment(1);
}

/// Record requests completed with an error.
pub fn record_request_failures(reason: FailureReason, count: u64) {
    counter!(
        "live_data_engine_request_failures_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Record a response for an unknown correlation id.
pub fn record_unknown_response() {
    counter!("live_data_engine_unknown_responses_total").increment(1);
}

/// Record a streaming event published to the hub.
pub fn record_data_published(kind: &'static str) {
    counter!("live_data_engine_data_published_total", "kind" => kind).increment(1);
}

/// Record a streaming event dropped for lack of a subscription.
pub fn record_data_dropped(kind: &'static str) {
    counter!("live_data_engine_data_dropped_total", "kind" => kind).increment(1);
}

/// Move the pending request gauge by one engine's change in count.
pub fn shift_pending_requests(previous: usize, current: usize) {
    shift_gauge("live_data_engine_pending_requests", previous, current);
}

/// Move the connected client gauge by one engine's change in count.
pub fn shift_connected_clients(previous: usize, current: usize) {
    shift_gauge("live_data_engine_connected_clients", previous, current);
}

/// Count a dispatch loop starting or stopping.
pub fn set_running(running: bool) {
    let gauge = gauge!("live_data_engine_running");
    if running {
        gauge.increment(1.0);
    } else {
        gauge.decrement(1.0);
    }
}

#[allow(clippy::cast_precision_loss)]
fn shift_gauge(name: &'static str, previous: usize, current: usize) {
    let gauge = gauge!(name);
    if current >= previous {
        gauge.increment((current - previous) as f64);
    } else {
        gauge.decrement((previous - current) as f64);
    }
}

// =============================================================================
// Tests
// =============================================================================
