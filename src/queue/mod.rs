//! Durable at-least-once message queue seam.

pub mod pubsub;

use async_trait::async_trait;

use crate::error::QueueError;

pub use pubsub::PubSubClient;

/// A message pulled from a subscription. `data` is still Base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Blocks until at least one message is available (or the transport gives up).
    async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<(), QueueError>;

    /// Publishes one message whose `data` is already Base64 text.
    async fn publish(&self, topic: &str, data: &str) -> Result<(), QueueError>;

    async fn ensure_topic(&self, topic: &str) -> Result<(), QueueError>;

    async fn ensure_subscription(&self, subscription: &str, topic: &str)
        -> Result<(), QueueError>;
}
