//! Live-connection registry and channel fan-out.
//!
//! A single [`Registry`] task owns every live connection. All other code talks
//! to it through a clonable [`RegistryHandle`] that submits commands to a FIFO
//! queue, so registration, removal and fan-out are serialized without a lock
//! on the connection set.
//!
//! The registry entry holds the only sending half of a connection's outbound
//! queue. Removing the entry drops that sender, which is what closes the
//! queue: a connection is live exactly as long as its queue is open.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use courier_core::{ChannelId, ConnectionId};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::{
    WS_BROADCAST_DELIVERIES_TOTAL, WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE,
};

/// Bytes written verbatim to a connection.
pub type Frame = Bytes;

// ─────────────────────────────────────────────────────────────────────────────
// Close reasons
// ─────────────────────────────────────────────────────────────────────────────

/// Why a connection was removed from the registry.
///
/// Recorded before the outbound queue closes so the write loop can put it in
/// the final close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Ordinary teardown (peer closed, read error).
    Normal,
    /// The gateway is shutting down.
    GoingAway,
    /// The outbound queue was full during fan-out.
    SlowConsumer,
    /// The client sent a frame over the size limit.
    FrameTooLarge,
    /// The heartbeat saw no traffic within the timeout.
    IdleTimeout,
}

impl CloseReason {
    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway | Self::IdleTimeout => 1001,
            Self::SlowConsumer => 1008,
            Self::FrameTooLarge => 1009,
        }
    }

    /// Close frame reason text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "",
            Self::GoingAway => "server shutting down",
            Self::SlowConsumer => "slow consumer",
            Self::FrameTooLarge => "frame too large",
            Self::IdleTimeout => "idle timeout",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound queue halves
// ─────────────────────────────────────────────────────────────────────────────

/// Registry-side half of a connection: identity, memberships, queue sender.
#[derive(Debug)]
pub struct Subscriber {
    id: ConnectionId,
    channels: HashSet<ChannelId>,
    tx: mpsc::Sender<Frame>,
    close_reason: Arc<OnceLock<CloseReason>>,
}

/// Connection-side half: the receiving end of the outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<Frame>,
    close_reason: Arc<OnceLock<CloseReason>>,
}

impl Subscriber {
    /// Create the two halves of a connection's outbound queue.
    ///
    /// The subscriber starts as a member of `channel` only. `capacity` is the
    /// number of frames buffered before the connection counts as a slow
    /// consumer (clamped to at least 1).
    pub fn new(id: ConnectionId, channel: ChannelId, capacity: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let close_reason = Arc::new(OnceLock::new());
        let subscriber = Self {
            id,
            channels: HashSet::from([channel]),
            tx,
            close_reason: Arc::clone(&close_reason),
        };
        (subscriber, OutboundQueue { rx, close_reason })
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Whether the subscriber belongs to `channel`.
    pub fn is_member(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }
}

impl OutboundQueue {
    /// Next frame, or `None` once the registry has closed the queue and it is
    /// drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        self.rx.try_recv()
    }

    /// Reason recorded by the registry when it closed the queue.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands and stats
// ─────────────────────────────────────────────────────────────────────────────

/// Fan-out target.
#[derive(Debug)]
enum Target {
    All,
    Channel(ChannelId),
}

impl Target {
    fn matches(&self, subscriber: &Subscriber) -> bool {
        match self {
            Self::All => true,
            Self::Channel(channel) => subscriber.channels.contains(channel),
        }
    }

    fn label(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Channel(channel) => channel.as_str(),
        }
    }
}

enum Command {
    Register(Subscriber),
    Unregister {
        id: ConnectionId,
        reason: CloseReason,
    },
    Broadcast {
        target: Target,
        frame: Frame,
    },
    Subscribe {
        id: ConnectionId,
        channel: ChannelId,
    },
    Unsubscribe {
        id: ConnectionId,
        channel: ChannelId,
    },
    Stats(oneshot::Sender<RegistryStats>),
}

/// Snapshot of the registry, taken in command order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Live connections.
    pub connections: usize,
    /// Member count per channel with at least one member.
    pub channels: BTreeMap<ChannelId, usize>,
    /// Frames enqueued by fan-out since startup.
    pub delivered_total: u64,
    /// Connections dropped during fan-out since startup.
    pub dropped_total: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Clonable entry point for submitting registry operations.
///
/// Every method enqueues a command and returns without waiting, except
/// [`stats`](Self::stats), which waits for the registry to reach it.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(s) => write!(f, "Register({})", s.id),
            Self::Unregister { id, reason } => write!(f, "Unregister({id}, {reason:?})"),
            Self::Broadcast { target, frame } => {
                write!(f, "Broadcast({}, {} bytes)", target.label(), frame.len())
            }
            Self::Subscribe { id, channel } => write!(f, "Subscribe({id}, {channel})"),
            Self::Unsubscribe { id, channel } => write!(f, "Unsubscribe({id}, {channel})"),
            Self::Stats(_) => f.write_str("Stats"),
        }
    }
}

impl RegistryHandle {
    fn submit(&self, command: Command) {
        if let Err(e) = self.tx.send(command) {
            debug!(command = ?e.0, "registry stopped, command discarded");
        }
    }

    /// Add a connection to the live set.
    pub fn register(&self, subscriber: Subscriber) {
        self.submit(Command::Register(subscriber));
    }

    /// Remove a connection and close its outbound queue. Idempotent.
    pub fn unregister(&self, id: &ConnectionId) {
        self.close(id, CloseReason::Normal);
    }

    /// Remove a connection, recording `reason` for its close frame. Idempotent.
    pub fn close(&self, id: &ConnectionId, reason: CloseReason) {
        self.submit(Command::Unregister {
            id: id.clone(),
            reason,
        });
    }

    /// Enqueue `frame` to every live connection.
    pub fn broadcast_all(&self, frame: Frame) {
        self.submit(Command::Broadcast {
            target: Target::All,
            frame,
        });
    }

    /// Enqueue `frame` to live connections that are members of `channel`.
    pub fn broadcast_to_channel(&self, channel: impl Into<ChannelId>, frame: Frame) {
        self.submit(Command::Broadcast {
            target: Target::Channel(channel.into()),
            frame,
        });
    }

    /// Add `channel` to a connection's memberships. Unknown ids are ignored.
    pub fn subscribe(&self, id: &ConnectionId, channel: impl Into<ChannelId>) {
        self.submit(Command::Subscribe {
            id: id.clone(),
            channel: channel.into(),
        });
    }

    /// Remove `channel` from a connection's memberships. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &ConnectionId, channel: impl Into<ChannelId>) {
        self.submit(Command::Unsubscribe {
            id: id.clone(),
            channel: channel.into(),
        });
    }

    /// Snapshot after every previously submitted command has been applied.
    ///
    /// Returns empty stats if the registry task has stopped.
    pub async fn stats(&self) -> RegistryStats {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Stats(tx));
        rx.await.unwrap_or_default()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.stats().await.connections
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry task
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the live-connection set.
pub struct Registry {
    rx: mpsc::UnboundedReceiver<Command>,
    connections: HashMap<ConnectionId, Subscriber>,
    delivered_total: u64,
    dropped_total: u64,
}

impl Registry {
    /// Create a registry and the handle that feeds it.
    pub fn new() -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            rx,
            connections: HashMap::new(),
            delivered_total: 0,
            dropped_total: 0,
        };
        (registry, RegistryHandle { tx })
    }

    /// Create a registry and run it on a new task.
    pub fn spawn() -> (RegistryHandle, JoinHandle<()>) {
        let (registry, handle) = Self::new();
        let task = tokio::spawn(registry.run());
        (handle, task)
    }

    /// Apply commands in submission order until every handle is dropped.
    #[tracing::instrument(skip_all, name = "registry")]
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.apply(command);
        }
        debug!(
            connections = self.connections.len(),
            "all registry handles dropped, exiting"
        );
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(subscriber) => self.register(subscriber),
            Command::Unregister { id, reason } => {
                let _ = self.remove(&id, reason);
            }
            Command::Broadcast { target, frame } => self.broadcast(&target, &frame),
            Command::Subscribe { id, channel } => {
                if let Some(subscriber) = self.connections.get_mut(&id) {
                    debug!(conn_id = %id, %channel, "subscribed");
                    let _ = subscriber.channels.insert(channel);
                }
            }
            Command::Unsubscribe { id, channel } => {
                if let Some(subscriber) = self.connections.get_mut(&id) {
                    debug!(conn_id = %id, %channel, "unsubscribed");
                    let _ = subscriber.channels.remove(&channel);
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, subscriber: Subscriber) {
        let id = subscriber.id.clone();
        if let Some(previous) = self.connections.insert(id.clone(), subscriber) {
            // Ids are unique per process; a repeat replaces the stale entry.
            let _ = previous.close_reason.set(CloseReason::Normal);
        }
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.connections.len() as f64);
        info!(conn_id = %id, connections = self.connections.len(), "client registered");
    }

    /// Drop the entry, which closes the queue. Returns whether it was live.
    fn remove(&mut self, id: &ConnectionId, reason: CloseReason) -> bool {
        let Some(subscriber) = self.connections.remove(id) else {
            return false;
        };
        let _ = subscriber.close_reason.set(reason);
        drop(subscriber);
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.connections.len() as f64);
        info!(
            conn_id = %id,
            ?reason,
            connections = self.connections.len(),
            "client unregistered"
        );
        true
    }

    fn broadcast(&mut self, target: &Target, frame: &Frame) {
        let mut recipients = 0u64;
        let mut to_remove = Vec::new();

        for subscriber in self.connections.values() {
            if !target.matches(subscriber) {
                continue;
            }
            match subscriber.tx.try_send(frame.clone()) {
                Ok(()) => recipients += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        conn_id = %subscriber.id,
                        channel = target.label(),
                        "outbound queue full, dropping slow client"
                    );
                    counter!(WS_BROADCAST_DROPS_TOTAL, "reason" => "slow_consumer").increment(1);
                    to_remove.push((subscriber.id.clone(), CloseReason::SlowConsumer));
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        conn_id = %subscriber.id,
                        channel = target.label(),
                        "outbound queue closed, dropping client"
                    );
                    counter!(WS_BROADCAST_DROPS_TOTAL, "reason" => "closed").increment(1);
                    to_remove.push((subscriber.id.clone(), CloseReason::Normal));
                }
            }
        }

        for (id, reason) in &to_remove {
            if self.remove(id, *reason) {
                self.dropped_total += 1;
            }
        }
        self.delivered_total += recipients;
        counter!(WS_BROADCAST_DELIVERIES_TOTAL).increment(recipients);
        debug!(
            channel = target.label(),
            bytes = frame.len(),
            recipients,
            dropped = to_remove.len(),
            "broadcast"
        );
    }

    fn stats(&self) -> RegistryStats {
        let mut channels = BTreeMap::new();
        for subscriber in self.connections.values() {
            for channel in &subscriber.channels {
                *channels.entry(channel.clone()).or_insert(0) += 1;
            }
        }
        RegistryStats {
            connections: self.connections.len(),
            channels,
            delivered_total: self.delivered_total,
            dropped_total: self.dropped_total,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
