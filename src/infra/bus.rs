//! Message bus adapters: NATS for deployments, broadcast channels in-process.

use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::application::bus::{BusError, BusMessage, BusSubscription, MessageBus};
use crate::cache::{rw_read, rw_write};

const SOURCE: &str = "review_engagement::infra::bus";
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        info!(target = SOURCE, url, "Connecting to NATS");
        let client = ConnectOptions::new()
            .name(concat!("review-engagement/", env!("CARGO_PKG_VERSION")))
            .connection_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|err| BusError::Connect(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(topic.to_string(), payload)
            .await
            .map_err(|err| BusError::publish(topic, err))
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|err| BusError::subscribe(topic, err))?;
        Ok(subscriber
            .map(|message| BusMessage {
                topic: message.subject.to_string(),
                payload: message.payload,
            })
            .boxed())
    }
}

/// Broadcast bus that also records every payload it saw.
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    log: RwLock<HashMap<String, Vec<Bytes>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .value()
            .clone()
    }

    pub fn published(&self, topic: &str) -> Vec<Bytes> {
        rw_read(&self.log, SOURCE, "published")
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Published payloads that parse as JSON.
    pub fn published_json(&self, topic: &str) -> Vec<Value> {
        self.published(topic)
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        rw_write(&self.log, SOURCE, "publish")
            .entry(topic.to_string())
            .or_default()
            .push(payload.clone());
        // No receivers is not an error for a fire-and-forget topic.
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => {
                            return Some((BusMessage { topic, payload }, receiver));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target = SOURCE, topic = %topic, skipped, "Subscriber lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_later_publishes() {
        let bus = MemoryBus::new();
        let mut subscription = bus.subscribe("requests").await.expect("subscribe");
        bus.publish("requests", Bytes::from_static(b"{\"a\":1}"))
            .await
            .expect("publish");
        let message = subscription.next().await.expect("message");
        assert_eq!(message.topic, "requests");
        assert_eq!(bus.published_json("requests"), vec![json!({"a": 1})]);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_recorded() {
        let bus = MemoryBus::new();
        bus.publish("events", Bytes::from_static(b"x"))
            .await
            .expect("publish");
        assert_eq!(bus.published("events").len(), 1);
        assert!(bus.published_json("events").is_empty());
    }
}
