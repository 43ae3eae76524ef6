//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `COURIER_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ConnectionSettings, GatewaySettings};

/// Longest accepted heartbeat ping interval.
pub const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 3600;

/// Longest accepted heartbeat idle timeout.
pub const MAX_HEARTBEAT_TIMEOUT_SECS: u64 = 86_400;

/// Load settings from an optional file, then apply env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings(path: Option<&Path>) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the gateway cannot run with.
pub fn validate(settings: &GatewaySettings) -> Result<()> {
    if settings.connection.outbound_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "connection.outboundCapacity must be greater than 0".into(),
        ));
    }
    if settings.connection.max_frame_size == 0 {
        return Err(SettingsError::InvalidValue(
            "connection.maxFrameSize must be greater than 0".into(),
        ));
    }
    if settings.connection.default_channel.is_empty() {
        return Err(SettingsError::InvalidValue(
            "connection.defaultChannel must not be empty".into(),
        ));
    }
    if settings.pubsub.topic.is_empty() {
        return Err(SettingsError::InvalidValue(
            "pubsub.topic must not be empty".into(),
        ));
    }
    validate_heartbeat(&settings.connection)?;
    let retry = &settings.pubsub.retry;
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(SettingsError::InvalidValue(format!(
            "pubsub.retry.baseDelayMs ({}) exceeds maxDelayMs ({})",
            retry.base_delay_ms, retry.max_delay_ms
        )));
    }
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return Err(SettingsError::InvalidValue(format!(
            "pubsub.retry.jitterFactor ({}) must be within 0.0..=1.0",
            retry.jitter_factor
        )));
    }
    Ok(())
}

fn validate_heartbeat(connection: &ConnectionSettings) -> Result<()> {
    let interval = connection.heartbeat_interval_secs;
    let timeout = connection.heartbeat_timeout_secs;
    if interval > MAX_HEARTBEAT_INTERVAL_SECS {
        return Err(SettingsError::InvalidValue(format!(
            "connection.heartbeatIntervalSecs ({interval}) exceeds {MAX_HEARTBEAT_INTERVAL_SECS}"
        )));
    }
    if interval > 0 && !(interval..=MAX_HEARTBEAT_TIMEOUT_SECS).contains(&timeout) {
        return Err(SettingsError::InvalidValue(format!(
            "connection.heartbeatTimeoutSecs ({timeout}) must be within \
             {interval}..={MAX_HEARTBEAT_TIMEOUT_SECS} when the heartbeat is enabled"
        )));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (env vars in production).
pub fn apply_overrides(settings: &mut GatewaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let parsed = |name: &str, min: u64, max: u64| {
        let val = string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("COURIER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed("COURIER_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = v as u16;
    }

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = parsed("COURIER_OUTBOUND_CAPACITY", 1, 1 << 20) {
        settings.connection.outbound_capacity = v as usize;
    }
    if let Some(v) = parsed("COURIER_MAX_FRAME_SIZE", 1, 64 << 20) {
        settings.connection.max_frame_size = v as usize;
    }
    if let Some(v) = string("COURIER_DEFAULT_CHANNEL") {
        settings.connection.default_channel = v;
    }
    if let Some(v) = parsed("COURIER_HEARTBEAT_INTERVAL_SECS", 0, MAX_HEARTBEAT_INTERVAL_SECS) {
        settings.connection.heartbeat_interval_secs = v;
    }
    if let Some(v) = parsed("COURIER_HEARTBEAT_TIMEOUT_SECS", 1, MAX_HEARTBEAT_TIMEOUT_SECS) {
        settings.connection.heartbeat_timeout_secs = v;
    }

    // ── Pub/sub ─────────────────────────────────────────────────────
    if let Some(v) = string("COURIER_REDIS_URL") {
        settings.pubsub.url = v;
    }
    if let Some(v) = string("COURIER_TOPIC") {
        settings.pubsub.topic = v;
    }
    if let Some(v) = parsed("COURIER_RETRY_MAX_FAILURES", 0, u64::from(u32::MAX)) {
        settings.pubsub.retry.max_consecutive_failures = v as u32;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("COURIER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("COURIER_LOG_FORMAT") {
        match serde_json::from_value(Value::String(v.to_lowercase())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => tracing::warn!(key = "COURIER_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
