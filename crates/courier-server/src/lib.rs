//! # courier-server
//!
//! Real-time fan-out gateway core and its HTTP surface.
//!
//! - [`websocket::registry`]: the single-owner live-connection registry with
//!   channel fan-out and slow-consumer drops
//! - [`websocket::connection`]: per-connection read/write loops and teardown
//! - [`bridge`]: external topic subscription (Redis) forwarded into the registry
//! - [`server`]: Axum router with `/ws`, `/health` and `/metrics`
//! - [`shutdown`]: graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod bridge;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use errors::{ServerError, SubscriptionError};
pub use server::GatewayServer;
pub use websocket::registry::{Registry, RegistryHandle};
