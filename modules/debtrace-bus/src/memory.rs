//! Process-local broker preserving the bus contract: at-least-once
//! delivery, lease-based redelivery, per-delivery ack ids, and a
//! growing `delivery_attempts` counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{BusError, Result};
use crate::{PulledMessage, Publisher, Subscriber};

struct QueuedMessage {
    message_id: String,
    data: Vec<u8>,
    delivery_attempts: i64,
    /// Set while a delivery is outstanding; cleared when the lease
    /// expires so the message becomes pullable again.
    leased_until: Option<Instant>,
    ack_id: Option<String>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<QueuedMessage>>,
    next_id: u64,
}

/// Shared in-memory broker. Cloning shares the underlying queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publisher(&self, topic: &str) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
            topic: topic.to_string(),
        }
    }

    pub fn subscriber(&self, topic: &str, batch_size: usize, ack_deadline: Duration) -> MemorySubscriber {
        MemorySubscriber {
            broker: self.clone(),
            topic: topic.to_string(),
            batch_size,
            ack_deadline,
        }
    }

    /// Number of messages still held for a topic (leased or not).
    pub async fn outstanding(&self, topic: &str) -> usize {
        let state = self.state.lock().await;
        state.topics.get(topic).map_or(0, |q| q.len())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let message_id = format!("m{}", state.next_id);
        state.topics.entry(topic.to_string()).or_default().push(QueuedMessage {
            message_id,
            data,
            delivery_attempts: 0,
            leased_until: None,
            ack_id: None,
        });
    }

    async fn pull(
        &self,
        topic: &str,
        batch_size: usize,
        ack_deadline: Duration,
    ) -> Vec<PulledMessage> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut pulled = Vec::new();
        state.next_id += 1;
        let mut ack_seq = state.next_id;

        let Some(queue) = state.topics.get_mut(topic) else {
            return pulled;
        };

        for msg in queue.iter_mut() {
            if pulled.len() >= batch_size {
                break;
            }
            let available = match msg.leased_until {
                None => true,
                Some(deadline) => deadline <= now,
            };
            if !available {
                continue;
            }
            msg.delivery_attempts += 1;
            msg.leased_until = Some(now + ack_deadline);
            ack_seq += 1;
            let ack_id = format!("a{ack_seq}");
            msg.ack_id = Some(ack_id.clone());
            pulled.push(PulledMessage {
                ack_id,
                message_id: msg.message_id.clone(),
                delivery_attempts: msg.delivery_attempts,
                data: msg.data.clone(),
            });
        }
        state.next_id = ack_seq;
        pulled
    }

    async fn ack(&self, topic: &str, ack_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let queue = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BusError::UnknownAckId(ack_id.to_string()))?;
        let position = queue
            .iter()
            .position(|m| m.ack_id.as_deref() == Some(ack_id))
            .ok_or_else(|| BusError::UnknownAckId(ack_id.to_string()))?;
        queue.remove(position);
        Ok(())
    }
}

pub struct MemoryPublisher {
    broker: MemoryBroker,
    topic: String,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, data: &serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(data).map_err(|e| BusError::Payload(e.to_string()))?;
        self.broker.publish(&self.topic, bytes).await;
        Ok(())
    }
}

pub struct MemorySubscriber {
    broker: MemoryBroker,
    topic: String,
    batch_size: usize,
    ack_deadline: Duration,
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn pull(&self) -> Result<Vec<PulledMessage>> {
        Ok(self.broker.pull(&self.topic, self.batch_size, self.ack_deadline).await)
    }

    async fn ack(&self, ack_id: &str) -> Result<()> {
        self.broker.ack(&self.topic, ack_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pull_caps_batch_and_leases_messages() {
        let broker = MemoryBroker::new();
        let publisher = broker.publisher("tasks");
        for i in 0..5 {
            publisher.publish(&serde_json::json!({ "n": i })).await.unwrap();
        }

        let sub = broker.subscriber("tasks", 3, Duration::from_secs(30));
        let first = sub.pull().await.unwrap();
        assert_eq!(first.len(), 3);

        // Leased messages are invisible until their deadline passes.
        let second = sub.pull().await.unwrap();
        assert_eq!(second.len(), 2);
        let third = sub.pull().await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn unacked_messages_redeliver_with_growing_attempts() {
        let broker = MemoryBroker::new();
        broker
            .publisher("tasks")
            .publish(&serde_json::json!({ "id": 1 }))
            .await
            .unwrap();

        let sub = broker.subscriber("tasks", 10, Duration::from_millis(20));
        let first = sub.pull().await.unwrap();
        assert_eq!(first[0].delivery_attempts, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = sub.pull().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].delivery_attempts, 2);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_ne!(second[0].ack_id, first[0].ack_id);
    }

    #[tokio::test]
    async fn ack_removes_a_delivery_permanently() {
        let broker = MemoryBroker::new();
        broker
            .publisher("tasks")
            .publish(&serde_json::json!({ "id": 1 }))
            .await
            .unwrap();

        let sub = broker.subscriber("tasks", 10, Duration::from_millis(10));
        let pulled = sub.pull().await.unwrap();
        sub.ack(&pulled[0].ack_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sub.pull().await.unwrap().is_empty());
        assert_eq!(broker.outstanding("tasks").await, 0);
    }

    #[tokio::test]
    async fn stale_ack_id_is_rejected() {
        let broker = MemoryBroker::new();
        broker
            .publisher("tasks")
            .publish(&serde_json::json!({ "id": 1 }))
            .await
            .unwrap();

        let sub = broker.subscriber("tasks", 10, Duration::from_millis(5));
        let first = sub.pull().await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let second = sub.pull().await.unwrap();

        // First lease expired and was superseded by the redelivery.
        assert!(matches!(
            sub.ack(&first[0].ack_id).await,
            Err(BusError::UnknownAckId(_))
        ));
        sub.ack(&second[0].ack_id).await.unwrap();
    }
}
