//! # courier-core
//!
//! Foundation types shared by every courier crate.
//!
//! - [`message`]: `Message` / `Envelope` wire types and envelope decoding
//! - [`ids`]: opaque connection identifiers and logical channel ids
//! - [`retry`]: exponential backoff configuration and delay math
//! - [`logging`]: `tracing` subscriber initialization
//! - [`errors`]: decode error type

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;
pub mod retry;

pub use errors::DecodeError;
pub use ids::{ChannelId, ConnectionId};
pub use message::{Envelope, Message};
pub use retry::RetryConfig;
