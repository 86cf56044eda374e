// Queue transport port.
//
// At-least-once delivery with manual acknowledgement. Implementations own
// their connection and must reconnect (and redeclare topology) on demand.

use super::moderation_models::QueueMessage;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

/// A received message awaiting ack or nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Connect and declare topology if not already connected. Idempotent.
    async fn ensure_connected(&self) -> Result<(), QueueError>;

    /// Durably publish; the message persists until a consumer acks it.
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Wait at most `timeout` for one message.
    async fn consume_one(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Negative acknowledgement. `requeue = true` asks for redelivery.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;
}
