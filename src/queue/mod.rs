// Durable message queue: broker abstraction, envelopes and consumers

pub mod consumer;
pub mod memory_broker;
pub mod redis_broker;

use crate::core::errors::QueueError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use consumer::{handler_fn, ConsumerSettings, HandlerError, MessageHandler, MessageQueue};
pub use memory_broker::MemoryBroker;
pub use redis_broker::RedisBroker;

/// Queue carrying email notifications
pub const NOTIFICATIONS_QUEUE: &str = "notifications";

/// Default exchange: routes to the queue named by the routing key
pub const DEFAULT_EXCHANGE: &str = "";

/// Stored form of a message
///
/// `id` makes every stored message unique so a delivery can be removed from the
/// in-flight list without touching identical payloads. `attempt` counts
/// deliveries, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub attempt: u32,
    pub body: String,
}

impl Envelope {
    pub fn new(body: &[u8]) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 1,
            body: STANDARD.encode(body),
        }
    }

    /// Same message, next delivery attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            id: self.id,
            attempt: self.attempt.saturating_add(1),
            body: self.body.clone(),
        }
    }

    pub fn decode_body(&self) -> Result<Vec<u8>, QueueError> {
        STANDARD
            .decode(&self.body)
            .map_err(|e| QueueError::Malformed(format!("body is not valid base64: {}", e)))
    }

    pub fn to_wire(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    pub fn from_wire(raw: &str) -> Result<Self, QueueError> {
        serde_json::from_str(raw).map_err(|e| QueueError::Malformed(format!("invalid envelope: {}", e)))
    }
}

/// A message handed to a consumer
///
/// `handle` is the broker-assigned delivery handle; it must be resolved exactly
/// once with `ack` or `nack`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub handle: String,
    pub message_id: Uuid,
    pub attempt: u32,
    pub body: Vec<u8>,
}

/// Durable broker primitive operations
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Idempotently create a durable queue
    async fn declare_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Append a message to a declared queue
    async fn push(&self, queue: &str, body: &[u8]) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next message; `None` when none arrived
    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Positive acknowledgment: the message is removed for good
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Negative acknowledgment; with `requeue` the message is delivered again later
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Restart the visibility clock of a delivery that is still being handled
    async fn touch(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return deliveries left unresolved for at least `visibility_timeout` to
    /// the queue; returns how many. Deliveries whose lease is still fresh belong
    /// to a live consumer and are not touched.
    async fn recover(&self, queue: &str, visibility_timeout: Duration) -> Result<usize, QueueError>;

    /// Release broker resources. Idempotent.
    async fn close(&self) -> Result<(), QueueError>;
}
