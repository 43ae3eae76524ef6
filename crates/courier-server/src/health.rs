//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::bridge::BridgeHealth;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live connections held by the registry.
    pub connections: usize,
    /// Event bridge health.
    pub bridge: BridgeHealth,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, bridge: BridgeHealth) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        bridge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeState;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, BridgeHealth::default());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, BridgeHealth::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn status_stays_ok_when_bridge_down() {
        let bridge = BridgeHealth {
            state: BridgeState::Down,
            consecutive_failures: 12,
            last_error: Some("connection refused".into()),
        };
        let resp = health_check(Instant::now(), 3, bridge);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 3);
        assert_eq!(parsed["bridge"]["state"], "down");
        assert!(parsed["uptime_secs"].is_number());
    }
}
