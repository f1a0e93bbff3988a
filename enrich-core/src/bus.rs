//! Topic-routed publish/subscribe between the content service and the
//! enrichment consumer.
//!
//! Delivery is at-least-once from the consumer's point of view: the bus does
//! not deduplicate, and every delivery runs in its own task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tokio::{sync::broadcast, task::JoinHandle};
use uuid::Uuid;

use crate::error::BusError;

pub mod topics {
    pub const CONTENT_CREATED: &str = "content.created";
    pub const ENRICHMENT_REQUESTED: &str = "weather.enrichment.requested";
    pub const ENRICHMENT_COMPLETED: &str = "weather.enrichment.completed";
}

pub const DEFAULT_CAPACITY: usize = 1024;

/// Message wrapper carried on the bus. The payload is opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: Uuid,
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope);
}

/// Publishing half of the bus; all a producer needs.
#[async_trait]
pub trait EventPublisher: Send + Sync + Debug {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError>;
}

pub trait EventBus: EventPublisher {
    /// Route every envelope published on `topic` to `handler`.
    fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> JoinHandle<()>;
}

/// Serialize `payload` and publish it, logging instead of returning failures.
///
/// Used wherever publication is a side effect that must not abort the
/// operation that triggered it.
pub async fn publish_event<T: Serialize + ?Sized>(
    bus: &dyn EventPublisher,
    topic: &str,
    payload: &T,
) -> bool {
    let value = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(source) => {
            let err = BusError::Serialization {
                topic: topic.to_string(),
                source,
            };
            tracing::error!(topic, error = %err, "failed to encode event");
            return false;
        }
    };

    match bus.publish(topic, value).await {
        Ok(()) => {
            tracing::debug!(topic, "event published");
            true
        }
        Err(err) => {
            tracing::error!(topic, error = %err, "failed to publish event");
            false
        }
    }
}

/// In-process bus with one broadcast channel per topic.
#[derive(Debug, Clone)]
pub struct LocalBus {
    capacity: usize,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Envelope>>>>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Envelope> {
        self.channels
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Raw receiver for `topic`, for callers that want to await envelopes
    /// directly instead of registering a handler.
    pub fn receiver(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        self.sender(topic).subscribe()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .lock()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Publish an already-built envelope, keeping its id and timestamp.
    pub fn publish_envelope(&self, envelope: Envelope) {
        let topic = envelope.topic.clone();
        // No subscribers is not an error: the event is simply dropped.
        if self.sender(&topic).send(envelope).is_err() {
            tracing::debug!(topic = %topic, "no subscribers for event");
        }
    }
}

#[async_trait]
impl EventPublisher for LocalBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self.publish_envelope(Envelope::new(topic, payload));
        Ok(())
    }
}

impl EventBus for LocalBus {
    fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> JoinHandle<()> {
        let mut rx = self.receiver(topic);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move { handler.handle(envelope).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %topic, skipped, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!(topic = %topic, "topic closed, dispatcher stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Envelope>);

    #[async_trait]
    impl EventHandler for Forward {
        async fn handle(&self, envelope: Envelope) {
            let _ = self.0.send(envelope);
        }
    }

    #[derive(Debug)]
    struct BrokenBus;

    #[async_trait]
    impl EventPublisher for BrokenBus {
        async fn publish(&self, _topic: &str, _payload: Value) -> Result<(), BusError> {
            Err(BusError::Closed)
        }
    }

    #[tokio::test]
    async fn routes_by_topic() {
        let bus = LocalBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _dispatcher = bus.subscribe(topics::CONTENT_CREATED, Arc::new(Forward(tx)));

        bus.publish(topics::ENRICHMENT_COMPLETED, serde_json::json!({"ignored": true}))
            .await
            .unwrap();
        bus.publish(topics::CONTENT_CREATED, serde_json::json!({"id": "p1"}))
            .await
            .unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.topic, topics::CONTENT_CREATED);
        assert_eq!(envelope.payload["id"], "p1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let bus = LocalBus::default();
        assert!(bus.publish("nobody.listens", Value::Null).await.is_ok());
        assert_eq!(bus.subscriber_count("nobody.listens"), 0);
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_event() {
        let bus = LocalBus::default();
        let mut a = bus.receiver(topics::CONTENT_CREATED);
        let mut b = bus.receiver(topics::CONTENT_CREATED);

        bus.publish(topics::CONTENT_CREATED, serde_json::json!(1)).await.unwrap();

        assert_eq!(a.recv().await.unwrap().payload, serde_json::json!(1));
        assert_eq!(b.recv().await.unwrap().payload, serde_json::json!(1));
    }

    #[tokio::test]
    async fn publish_event_swallows_bus_errors() {
        let delivered = publish_event(&BrokenBus, topics::CONTENT_CREATED, &serde_json::json!({})).await;
        assert!(!delivered);
    }
}
