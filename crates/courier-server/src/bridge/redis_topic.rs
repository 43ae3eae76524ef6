//! Redis pub/sub topic.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{info, warn};

use super::source::EventSource;
use crate::errors::SubscriptionError;

/// Subscription to a single Redis pub/sub channel.
///
/// When the message stream ends (connection lost) `recv` reports
/// [`SubscriptionError::StreamEnded`]; the following call reconnects and
/// subscribes again.
pub struct RedisTopic {
    client: redis::Client,
    topic: String,
    messages: Option<BoxStream<'static, redis::Msg>>,
}

impl RedisTopic {
    /// Connect and subscribe. Failing here is a startup error.
    pub async fn connect(url: &str, topic: &str) -> Result<Self, SubscriptionError> {
        let client = redis::Client::open(url)?;
        let mut this = Self {
            client,
            topic: topic.to_owned(),
            messages: None,
        };
        this.subscribe().await?;
        Ok(this)
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn subscribe(&mut self) -> Result<(), SubscriptionError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.topic).await?;
        self.messages = Some(pubsub.into_on_message().boxed());
        info!(topic = %self.topic, "subscribed to topic");
        Ok(())
    }
}

impl fmt::Debug for RedisTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTopic")
            .field("topic", &self.topic)
            .field("subscribed", &self.messages.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSource for RedisTopic {
    async fn recv(&mut self) -> Result<Bytes, SubscriptionError> {
        if self.messages.is_none() {
            self.subscribe().await?;
        }
        let Some(messages) = self.messages.as_mut() else {
            return Err(SubscriptionError::StreamEnded);
        };

        match messages.next().await {
            Some(msg) => Ok(Bytes::copy_from_slice(msg.get_payload_bytes())),
            None => {
                warn!(topic = %self.topic, "subscription stream ended");
                self.messages = None;
                Err(SubscriptionError::StreamEnded)
            }
        }
    }
}
