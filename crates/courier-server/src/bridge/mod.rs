//! External topic subscription and the bridge that fans it out.

pub mod event_bridge;
pub mod redis_topic;
pub mod source;

pub use event_bridge::{BridgeHealth, BridgeState, BridgeStatus, EventBridge};
pub use redis_topic::RedisTopic;
pub use source::{ChannelSource, EventSource};
