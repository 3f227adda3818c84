//! Message bus client for the task pipeline.
//!
//! The pipeline needs only three operations: publish to a topic, pull
//! a leased batch from a subscription, and ack individual deliveries.
//! [`Publisher`] and [`Subscriber`] capture those seams; the concrete
//! implementations are a REST client for a Pub/Sub-compatible endpoint
//! and an in-memory broker with the same at-least-once semantics, used
//! by tests and local runs.

pub mod error;
pub mod memory;
pub mod pubsub;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub use error::{BusError, Result};
pub use memory::MemoryBroker;
pub use pubsub::{PubSubPublisher, PubSubSubscriber};

/// A message delivered from a subscription pull.
///
/// `delivery_attempts` starts at 1 and grows on every redelivery of an
/// unacked message; workflows derive `retry_count` from it.
#[derive(Debug, Clone)]
pub struct PulledMessage {
    pub ack_id: String,
    pub message_id: String,
    pub delivery_attempts: i64,
    pub data: Vec<u8>,
}

impl PulledMessage {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data).map_err(|e| BusError::Payload(e.to_string()))
    }
}

/// Publishes JSON payloads to one topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, data: &serde_json::Value) -> Result<()>;
}

/// Pulls leased batches from one subscription.
///
/// An unacked delivery is redelivered after its lease expires; acking
/// removes it permanently.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn pull(&self) -> Result<Vec<PulledMessage>>;
    async fn ack(&self, ack_id: &str) -> Result<()>;
}
