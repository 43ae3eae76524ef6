//! One accepted WebSocket connection.
//!
//! A connection runs two loops over the split socket. The read loop treats
//! inbound frames purely as a liveness and closure signal. The write loop
//! drains the outbound queue filled by the registry and finishes with a close
//! frame once the registry closes that queue. Whichever loop ends first
//! triggers teardown, which always goes through the registry.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use courier_core::{ChannelId, ConnectionId};
use courier_settings::ConnectionSettings;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use tokio::time;
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as ProtocolError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::heartbeat::{HeartbeatResult, Liveness, run_heartbeat};
use super::registry::{CloseReason, Frame, OutboundQueue, RegistryHandle, Subscriber};
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// How long teardown waits for the write loop to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Close codes that count as an orderly peer shutdown.
const NORMAL_CLOSE_CODES: [u16; 2] = [1000, 1001];

/// Everything a connection needs from the server.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Registry the connection registers with.
    pub registry: RegistryHandle,
    /// Per-connection limits.
    pub settings: Arc<ConnectionSettings>,
    /// Server-wide shutdown token.
    pub shutdown: CancellationToken,
}

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEnd {
    /// The peer sent a close frame (with its code, if any).
    Closed(Option<u16>),
    /// The stream ended without a close frame.
    Ended,
    /// Reading failed.
    Error,
    /// The peer sent a frame of this many bytes, over the limit.
    TooLarge(usize),
    /// Server shutdown.
    Cancelled,
}

impl InboundEnd {
    /// Close reason to record when tearing the connection down.
    pub fn close_reason(self) -> CloseReason {
        match self {
            Self::Cancelled => CloseReason::GoingAway,
            Self::TooLarge(_) => CloseReason::FrameTooLarge,
            Self::Closed(_) | Self::Ended | Self::Error => CloseReason::Normal,
        }
    }
}

/// Why the write loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundEnd {
    /// The registry closed the queue; a close frame was attempted.
    QueueClosed(Option<CloseReason>),
    /// Writing to the socket failed.
    WriteError,
}

/// Serve an upgraded socket until either side ends it.
pub async fn serve_connection(socket: WebSocket, ctx: ConnectionContext) {
    let id = ConnectionId::new();
    serve(socket, ctx, id).await;
}

#[tracing::instrument(skip_all, fields(conn_id = %id))]
async fn serve(socket: WebSocket, ctx: ConnectionContext, id: ConnectionId) {
    let settings = &ctx.settings;
    let (subscriber, queue) = Subscriber::new(
        id.clone(),
        ChannelId::from(settings.default_channel.as_str()),
        settings.outbound_capacity,
    );
    ctx.registry.register(subscriber);
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let heartbeat = settings.heartbeat();
    let liveness = Arc::new(Liveness::new());
    let conn_token = ctx.shutdown.child_token();
    let (sink, stream) = socket.split();

    let mut outbound = tokio::spawn(run_outbound(
        sink,
        queue,
        heartbeat.map(|(interval, _)| interval),
    ));
    let mut inbound = tokio::spawn(run_inbound(
        stream,
        settings.max_frame_size,
        Arc::clone(&liveness),
        conn_token.clone(),
    ));

    if let Some((interval, timeout)) = heartbeat {
        let registry = ctx.registry.clone();
        let token = conn_token.clone();
        let id = id.clone();
        drop(tokio::spawn(async move {
            if run_heartbeat(&liveness, interval, timeout, token).await == HeartbeatResult::TimedOut {
                warn!(conn_id = %id, "heartbeat timed out, closing");
                registry.close(&id, CloseReason::IdleTimeout);
            }
        }));
    }

    tokio::select! {
        end = &mut inbound => {
            let reason = end.map_or(CloseReason::Normal, InboundEnd::close_reason);
            ctx.registry.close(&id, reason);
            if time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
                debug!("write loop did not finish in time, aborting");
                outbound.abort();
            }
        }
        _ = &mut outbound => {
            inbound.abort();
            ctx.registry.unregister(&id);
        }
    }

    conn_token.cancel();
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    info!("client disconnected");
}

/// Read until the peer goes away, a frame is too large, or `cancel` fires.
///
/// Every inbound frame counts as activity; none is decoded. An oversize frame
/// is caught here or, when the protocol layer rejects it first, recognised
/// from the read error.
pub async fn run_inbound<S, E>(
    mut stream: S,
    max_frame_size: usize,
    liveness: Arc<Liveness>,
    cancel: CancellationToken,
) -> InboundEnd
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: StdError + 'static,
{
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return InboundEnd::Cancelled,
            next = stream.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                if let Some(size) = oversize_message(&e) {
                    warn!(size, max_frame_size, "inbound frame over protocol limit");
                    return InboundEnd::TooLarge(size);
                }
                warn!(error = %e, "websocket read error");
                return InboundEnd::Error;
            }
            None => {
                debug!("websocket stream ended");
                return InboundEnd::Ended;
            }
        };
        liveness.mark_alive();

        let size = match &message {
            WsMessage::Text(text) => text.len(),
            WsMessage::Binary(bytes) => bytes.len(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            WsMessage::Close(frame) => {
                let code = frame.as_ref().map(|f| f.code);
                match code {
                    Some(code) if !NORMAL_CLOSE_CODES.contains(&code) => {
                        warn!(code, "client closed unexpectedly");
                    }
                    _ => debug!(?code, "client closed"),
                }
                return InboundEnd::Closed(code);
            }
        };
        if size > max_frame_size {
            warn!(size, max_frame_size, "inbound frame over limit");
            return InboundEnd::TooLarge(size);
        }
    }
}

/// Size of the rejected message when `error` is a protocol capacity error.
fn oversize_message(error: &(dyn StdError + 'static)) -> Option<usize> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(ProtocolError::Capacity(CapacityError::MessageTooLong { size, .. })) =
            err.downcast_ref::<ProtocolError>()
        {
            return Some(*size);
        }
        current = err.source();
    }
    None
}

/// Write queued frames until the registry closes the queue.
///
/// With `ping_every` set, a ping goes out on that interval.
pub async fn run_outbound<S>(
    mut sink: S,
    mut queue: OutboundQueue,
    ping_every: Option<Duration>,
) -> OutboundEnd
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut ping = ping_every.map(|period| time::interval_at(time::Instant::now() + period, period));

    loop {
        let next = tokio::select! {
            frame = queue.recv() => frame,
            () = async {
                match ping.as_mut() {
                    Some(interval) => { let _ = interval.tick().await; }
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = sink.send(WsMessage::Ping(Frame::new())).await {
                    debug!(error = %e, "ping failed");
                    return OutboundEnd::WriteError;
                }
                continue;
            }
        };

        let Some(frame) = next else {
            let reason = queue.close_reason();
            let close = reason.unwrap_or(CloseReason::Normal);
            let frame = CloseFrame {
                code: close.code(),
                reason: Utf8Bytes::from_static(close.as_str()),
            };
            if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                debug!(error = %e, "close frame not delivered");
            }
            return OutboundEnd::QueueClosed(reason);
        };

        if let Err(e) = sink.send(to_ws_message(frame)).await {
            debug!(error = %e, "websocket write error");
            return OutboundEnd::WriteError;
        }
    }
}

/// Text frame for UTF-8 payloads, binary otherwise.
fn to_ws_message(frame: Frame) -> WsMessage {
    match std::str::from_utf8(&frame) {
        Ok(text) => WsMessage::Text(Utf8Bytes::from(text)),
        Err(_) => WsMessage::Binary(frame),
    }
}
