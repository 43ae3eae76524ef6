//! # courier-settings
//!
//! Layered configuration for the gateway.
//!
//! Resolution order, lowest to highest priority:
//! 1. Compiled defaults ([`GatewaySettings::default()`])
//! 2. An optional JSON settings file, deep-merged over the defaults
//! 3. `COURIER_*` environment variables
//!
//! The binary applies its CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::load_settings;
pub use types::*;
