//! Per-connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits and defaults applied to every accepted connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Frames buffered per connection before it is dropped as a slow consumer.
    pub outbound_capacity: usize,
    /// Largest inbound frame accepted from a client, in bytes.
    pub max_frame_size: usize,
    /// Channel every new connection joins.
    pub default_channel: String,
    /// Ping interval in seconds; `0` disables the heartbeat.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a heartbeat-enabled connection is reaped.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_frame_size: 512,
            default_channel: "general".to_string(),
            heartbeat_interval_secs: 0,
            heartbeat_timeout_secs: 90,
        }
    }
}

impl ConnectionSettings {
    /// Heartbeat `(interval, timeout)`, or `None` when disabled.
    pub fn heartbeat(&self) -> Option<(Duration, Duration)> {
        (self.heartbeat_interval_secs > 0).then(|| {
            (
                Duration::from_secs(self.heartbeat_interval_secs),
                Duration::from_secs(self.heartbeat_timeout_secs),
            )
        })
    }
}
