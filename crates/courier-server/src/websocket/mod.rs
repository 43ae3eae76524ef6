//! WebSocket connection management, heartbeat, and the connection registry.

pub mod connection;
pub mod heartbeat;
pub mod registry;
