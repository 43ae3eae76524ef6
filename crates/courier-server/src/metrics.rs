//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live connections held by the registry (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Frames enqueued to connections by fan-out (counter).
pub const WS_BROADCAST_DELIVERIES_TOTAL: &str = "ws_broadcast_deliveries_total";
/// Connections dropped during fan-out (counter, labels: reason).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Envelopes forwarded by the bridge (counter).
pub const BRIDGE_MESSAGES_TOTAL: &str = "bridge_messages_total";
/// Payloads the bridge could not decode (counter).
pub const BRIDGE_DECODE_ERRORS_TOTAL: &str = "bridge_decode_errors_total";
/// Subscription errors seen by the bridge (counter).
pub const BRIDGE_SUBSCRIPTION_ERRORS_TOTAL: &str = "bridge_subscription_errors_total";
/// Bridge health (gauge). 1 = up, 0 = down.
pub const BRIDGE_UP: &str = "bridge_up";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_BROADCAST_DELIVERIES_TOTAL,
            WS_BROADCAST_DROPS_TOTAL,
            BRIDGE_MESSAGES_TOTAL,
            BRIDGE_DECODE_ERRORS_TOTAL,
            BRIDGE_SUBSCRIPTION_ERRORS_TOTAL,
            BRIDGE_UP,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
