//! Message bus contract used for event topics and the request queue.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to message bus: {0}")]
    Connect(String),
    #[error("failed to publish to `{topic}`: {message}")]
    Publish { topic: String, message: String },
    #[error("failed to subscribe to `{topic}`: {message}")]
    Subscribe { topic: String, message: String },
}

impl BusError {
    pub fn publish(topic: &str, err: impl std::fmt::Display) -> Self {
        Self::Publish {
            topic: topic.to_string(),
            message: err.to_string(),
        }
    }

    pub fn subscribe(topic: &str, err: impl std::fmt::Display) -> Self {
        Self::Subscribe {
            topic: topic.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

pub type BusSubscription = BoxStream<'static, BusMessage>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError>;
}
