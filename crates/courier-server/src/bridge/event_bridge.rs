//! Event bridge: drains the external topic into channel broadcasts.

use std::sync::Arc;

use bytes::Bytes;
use courier_core::{Envelope, RetryConfig};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::source::EventSource;
use crate::errors::SubscriptionError;
use crate::metrics::{
    BRIDGE_DECODE_ERRORS_TOTAL, BRIDGE_MESSAGES_TOTAL, BRIDGE_SUBSCRIPTION_ERRORS_TOTAL, BRIDGE_UP,
};
use crate::websocket::registry::RegistryHandle;

/// Whether the subscription is currently delivering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// Receiving, or retrying below the failure threshold.
    #[default]
    Up,
    /// Consecutive failures reached the threshold; still retrying.
    Down,
}

/// Snapshot of bridge health.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BridgeHealth {
    /// Current state.
    pub state: BridgeState,
    /// Failed receives since the last success.
    pub consecutive_failures: u32,
    /// Most recent subscription error, cleared on recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared, readable view of the bridge's health.
#[derive(Clone, Debug, Default)]
pub struct BridgeStatus {
    inner: Arc<RwLock<BridgeHealth>>,
}

impl BridgeStatus {
    /// A new status, initially up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current health.
    pub fn snapshot(&self) -> BridgeHealth {
        self.inner.read().clone()
    }

    /// Current state.
    pub fn state(&self) -> BridgeState {
        self.inner.read().state
    }

    /// Record a successful receive. Returns `true` if this ends a failure streak.
    fn record_success(&self) -> bool {
        let mut health = self.inner.write();
        if health.consecutive_failures == 0 {
            return false;
        }
        *health = BridgeHealth::default();
        gauge!(BRIDGE_UP).set(1.0);
        true
    }

    /// Record a failed receive. Returns `true` on the transition to down.
    fn record_failure(&self, failures: u32, error: &SubscriptionError, exhausted: bool) -> bool {
        let mut health = self.inner.write();
        health.consecutive_failures = failures;
        health.last_error = Some(error.to_string());
        if exhausted && health.state == BridgeState::Up {
            health.state = BridgeState::Down;
            gauge!(BRIDGE_UP).set(0.0);
            return true;
        }
        false
    }
}

/// Forwards envelopes from an [`EventSource`] to the registry.
pub struct EventBridge<S> {
    source: S,
    registry: RegistryHandle,
    retry: RetryConfig,
    status: BridgeStatus,
    cancel: CancellationToken,
}

impl<S: EventSource> EventBridge<S> {
    /// Create a bridge. It does nothing until [`run`](Self::run).
    pub fn new(
        source: S,
        registry: RegistryHandle,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            registry,
            retry,
            status: BridgeStatus::new(),
            cancel,
        }
    }

    /// Report health into an existing status handle.
    #[must_use]
    pub fn with_status(mut self, status: BridgeStatus) -> Self {
        self.status = status;
        self
    }

    /// Health handle, readable while the bridge runs.
    pub fn status(&self) -> BridgeStatus {
        self.status.clone()
    }

    /// Run until cancelled or until the source closes for good.
    ///
    /// Subscription errors are retried with exponential backoff; they never
    /// end the loop.
    #[tracing::instrument(skip_all, name = "event_bridge")]
    pub async fn run(mut self) {
        gauge!(BRIDGE_UP).set(1.0);
        let mut failures: u32 = 0;

        loop {
            let received = tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("event bridge cancelled, exiting");
                    return;
                }
                received = self.source.recv() => received,
            };

            match received {
                Ok(payload) => {
                    if self.status.record_success() {
                        info!(failures, "subscription recovered");
                    }
                    failures = 0;
                    self.forward(payload);
                }
                Err(SubscriptionError::Closed) => {
                    info!("event source closed, exiting");
                    return;
                }
                Err(e) => {
                    let delay = self.retry.delay_for(failures, rand::random::<f64>());
                    failures = failures.saturating_add(1);
                    counter!(BRIDGE_SUBSCRIPTION_ERRORS_TOTAL).increment(1);

                    let exhausted = self.retry.is_exhausted(failures);
                    if self.status.record_failure(failures, &e, exhausted) {
                        error!(error = %e, failures, "event bridge down, still retrying");
                    }
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "subscription error, retrying"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            info!("event bridge cancelled during backoff, exiting");
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Decode for routing, then forward the original bytes.
    fn forward(&self, payload: Bytes) {
        match Envelope::decode(&payload) {
            Ok(envelope) => {
                debug!(
                    channel = %envelope.channel_id,
                    message_id = %envelope.message.id,
                    bytes = payload.len(),
                    "forwarding envelope"
                );
                counter!(BRIDGE_MESSAGES_TOTAL).increment(1);
                self.registry.broadcast_to_channel(envelope.channel_id, payload);
            }
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping undecodable payload");
                counter!(BRIDGE_DECODE_ERRORS_TOTAL).increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use courier_core::{ChannelId, ConnectionId};
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use crate::bridge::source::ChannelSource;
    use crate::websocket::registry::{OutboundQueue, Registry, Subscriber};

    const VALID: &[u8] = br#"{"channelId":"general","message":{"id":"m1","content":"hi","userId":"u1","channelId":"general","timestamp":"2026-01-01T00:00:00Z"}}"#;

    fn fast_retry(threshold: u32) -> RetryConfig {
        RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 400,
            jitter_factor: 0.0,
            max_consecutive_failures: threshold,
        }
    }

    fn drain(queue: &mut OutboundQueue) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = queue.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn join(registry: &RegistryHandle, channel: &str) -> OutboundQueue {
        let (sub, queue) = Subscriber::new(ConnectionId::new(), ChannelId::from(channel), 64);
        registry.register(sub);
        queue
    }

    /// Fails a fixed number of times, then waits forever. Records call times.
    struct FlakySource {
        calls: Arc<Mutex<Vec<Instant>>>,
        failures_left: usize,
    }

    #[async_trait]
    impl EventSource for FlakySource {
        async fn recv(&mut self) -> Result<Bytes, SubscriptionError> {
            self.calls.lock().push(Instant::now());
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(SubscriptionError::StreamEnded);
            }
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn malformed_payload_skipped_then_valid_forwarded() {
        let (registry, _task) = Registry::spawn();
        let mut general = join(&registry, "general");

        let (tx, source) = ChannelSource::new(8);
        tx.send(Ok(Bytes::from_static(b"{not json"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(VALID))).await.unwrap();
        drop(tx);

        let bridge = EventBridge::new(source, registry.clone(), fast_retry(10), CancellationToken::new());
        let status = bridge.status();
        bridge.run().await;
        let _ = registry.stats().await;

        assert_eq!(drain(&mut general), vec![Bytes::from_static(VALID)]);
        assert_eq!(status.state(), BridgeState::Up);
    }

    #[tokio::test]
    async fn forwards_bytes_verbatim() {
        let (registry, _task) = Registry::spawn();
        let mut general = join(&registry, "general");
        let payload = Bytes::from_static(
            b"{ \"message\" : {\"content\":\"caf\xc3\xa9\", \"extra\": [1,2]},\n  \"channelId\":\"general\" }",
        );

        let (tx, source) = ChannelSource::new(8);
        tx.send(Ok(payload.clone())).await.unwrap();
        drop(tx);
        EventBridge::new(source, registry.clone(), fast_retry(10), CancellationToken::new())
            .run()
            .await;
        let _ = registry.stats().await;

        assert_eq!(drain(&mut general), vec![payload]);
    }

    #[tokio::test]
    async fn routes_by_envelope_channel() {
        let (registry, _task) = Registry::spawn();
        let mut general = join(&registry, "general");
        let mut random = join(&registry, "random");
        let to_random = Bytes::from_static(br#"{"channelId":"random","message":{"id":"m2"}}"#);

        let (tx, source) = ChannelSource::new(8);
        tx.send(Ok(to_random.clone())).await.unwrap();
        tx.send(Ok(Bytes::from_static(br#"{"channelId":"","message":{}}"#))).await.unwrap();
        drop(tx);
        EventBridge::new(source, registry.clone(), fast_retry(10), CancellationToken::new())
            .run()
            .await;
        let _ = registry.stats().await;

        assert!(drain(&mut general).is_empty());
        assert_eq!(drain(&mut random), vec![to_random]);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_to_cap_and_reports_down() {
        let (registry, _task) = Registry::spawn();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let source = FlakySource {
            calls: Arc::clone(&calls),
            failures_left: 5,
        };
        let cancel = CancellationToken::new();
        let bridge = EventBridge::new(source, registry, fast_retry(3), cancel.clone());
        let status = bridge.status();
        let task = tokio::spawn(bridge.run());

        tokio::time::sleep(Duration::from_secs(10)).await;

        let calls = calls.lock().clone();
        assert_eq!(calls.len(), 6);
        let gaps: Vec<u128> = calls.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![100, 200, 400, 400, 400]);

        let health = status.snapshot();
        assert_eq!(health.state, BridgeState::Down);
        assert_eq!(health.consecutive_failures, 5);
        assert_eq!(health.last_error.as_deref(), Some("subscription stream ended"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_down_restores_up() {
        let (registry, _task) = Registry::spawn();
        let mut general = join(&registry, "general");
        let (tx, source) = ChannelSource::new(8);
        for _ in 0..3 {
            tx.send(Err(SubscriptionError::StreamEnded)).await.unwrap();
        }

        let bridge = EventBridge::new(source, registry.clone(), fast_retry(2), CancellationToken::new());
        let status = bridge.status();
        let task = tokio::spawn(bridge.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(status.state(), BridgeState::Down);
        assert_eq!(status.snapshot().consecutive_failures, 3);

        tx.send(Ok(Bytes::from_static(VALID))).await.unwrap();
        drop(tx);
        task.await.unwrap();
        let _ = registry.stats().await;

        assert_eq!(status.snapshot(), BridgeHealth::default());
        assert_eq!(drain(&mut general), vec![Bytes::from_static(VALID)]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_threshold_never_reports_down() {
        let (registry, _task) = Registry::spawn();
        let source = FlakySource {
            calls: Arc::new(Mutex::new(Vec::new())),
            failures_left: 50,
        };
        let cancel = CancellationToken::new();
        let bridge = EventBridge::new(source, registry, fast_retry(0), cancel.clone());
        let status = bridge.status();
        let task = tokio::spawn(bridge.run());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status.state(), BridgeState::Up);
        assert_eq!(status.snapshot().consecutive_failures, 50);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_idle_bridge() {
        let (registry, _task) = Registry::spawn();
        let (_tx, source) = ChannelSource::new(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(EventBridge::new(source, registry, fast_retry(3), cancel.clone()).run());

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn health_serializes_lowercase_state() {
        let health = BridgeHealth {
            state: BridgeState::Down,
            consecutive_failures: 4,
            last_error: Some("boom".into()),
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["state"], "down");
        assert_eq!(json["consecutive_failures"], 4);
        assert_eq!(json["last_error"], "boom");
    }
}
