//! In-process typed pub/sub for the realtime voice core.
//!
//! Topic-keyed, not agent-keyed (compare `orchestrator::bus::AgentBus`,
//! which routes by parent/child agent id). Publishing never blocks: a
//! full subscriber queue drops the message and increments a counter
//! rather than stalling the publisher.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

const DEFAULT_TOPIC_CAPACITY: usize = 100;

/// A single bus message: a topic name plus an arbitrary JSON payload.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

/// Receiving end of a topic subscription.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

#[derive(Default)]
struct Topics {
    senders: HashMap<String, Vec<mpsc::Sender<BusMessage>>>,
}

/// Declarative topic-based message bus. Cheap to clone; clones share
/// the same underlying subscriber map.
#[derive(Clone)]
pub struct MessageBus {
    topics: Arc<Mutex<Topics>>,
    dropped: Arc<AtomicU64>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(Topics::default())),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to `topic` with the default bounded capacity.
    pub async fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        self.subscribe_with_capacity(topic, DEFAULT_TOPIC_CAPACITY).await
    }

    pub async fn subscribe_with_capacity(&self, topic: impl Into<String>, capacity: usize) -> Subscription {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(capacity);
        let mut topics = self.topics.lock().await;
        topics.senders.entry(topic.clone()).or_default().push(tx);
        Subscription { topic, rx }
    }

    /// Publish `payload` to `topic`. Never blocks: subscribers whose
    /// queue is full are skipped and the drop counter is incremented.
    pub async fn publish(&self, topic: impl Into<String>, payload: Value) {
        let topic = topic.into();
        let msg = BusMessage { topic: topic.clone(), payload };
        let topics = self.topics.lock().await;
        let Some(senders) = topics.senders.get(&topic) else {
            return;
        };
        for sender in senders {
            if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(msg.clone()) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("bus: dropped message on topic '{}', subscriber queue full", topic);
            }
        }
    }

    /// Total number of messages dropped due to a full subscriber queue,
    /// across all topics, since the bus was created.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("voice_command").await;
        bus.publish("voice_command", json!({"text": "go forward"})).await;
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.topic, "voice_command");
        assert_eq!(msg.payload["text"], "go forward");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_noop() {
        let bus = MessageBus::new();
        bus.publish("nobody_listening", json!({})).await;
        assert_eq!(bus.dropped_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts_instead_of_blocking() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe_with_capacity("text_response", 1).await;
        bus.publish("text_response", json!({"n": 1})).await;
        bus.publish("text_response", json!({"n": 2})).await;
        assert_eq!(bus.dropped_count(), 1);
        let first = sub.recv().await.unwrap();
        assert_eq!(first.payload["n"], 1);
    }

    #[tokio::test]
    async fn independent_topics_do_not_interfere() {
        let bus = MessageBus::new();
        let mut commands = bus.subscribe("voice_command").await;
        let mut responses = bus.subscribe("text_response").await;
        bus.publish("voice_command", json!({"kind": "cmd"})).await;
        bus.publish("text_response", json!({"kind": "resp"})).await;
        assert_eq!(commands.recv().await.unwrap().payload["kind"], "cmd");
        assert_eq!(responses.recv().await.unwrap().payload["kind"], "resp");
    }
}
