//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may specify any subset of fields and the rest keep their defaults.

mod connection;
mod server;

pub use connection::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings for the gateway.
///
/// Example file:
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "pubsub": { "url": "redis://cache:6379", "topic": "messages" },
///   "connection": { "outboundCapacity": 512 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Per-connection limits and defaults.
    pub connection: ConnectionSettings,
    /// External pub/sub backend.
    pub pubsub: PubSubSettings,
    /// Log output.
    pub logging: LoggingSettings,
}
