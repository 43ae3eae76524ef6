//! Where raw topic payloads come from.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::SubscriptionError;

/// A subscription to one external topic.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next raw payload.
    ///
    /// [`SubscriptionError::Closed`] means the source is finished for good;
    /// any other error is transient and the caller may call `recv` again.
    async fn recv(&mut self) -> Result<Bytes, SubscriptionError>;
}

/// In-process source fed through an mpsc channel.
///
/// Reports [`SubscriptionError::Closed`] once every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Bytes, SubscriptionError>>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<Result<Bytes, SubscriptionError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn recv(&mut self) -> Result<Bytes, SubscriptionError> {
        self.rx.recv().await.unwrap_or(Err(SubscriptionError::Closed))
    }
}
