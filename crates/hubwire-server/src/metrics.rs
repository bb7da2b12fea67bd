//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants.

/// Invocations total (counter, labels: target, method, outcome).
pub const INVOCATIONS_TOTAL: &str = "hub_invocations_total";
/// Invocation duration seconds (histogram, labels: target, method).
pub const INVOCATION_DURATION_SECONDS: &str = "hub_invocation_duration_seconds";
/// Frames rejected before dispatch (counter, labels: kind).
pub const INVOCATION_REJECTIONS_TOTAL: &str = "hub_invocation_rejections_total";
/// Invocations vetoed by an interceptor (counter, labels: interceptor).
pub const INVOCATIONS_SUPPRESSED_TOTAL: &str = "hub_invocations_suppressed_total";
/// Responses that could not be written back (counter, labels: reason).
pub const RESPONSE_DROPS_TOTAL: &str = "hub_response_drops_total";
/// Push messages (counter, labels: outcome).
pub const PUSH_MESSAGES_TOTAL: &str = "hub_push_messages_total";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Upgrades refused because the table was full (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
