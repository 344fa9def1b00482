//! Outbound create/update/delete notifications.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::bus::MessageBus;
use crate::domain::{entities::EntityKind, session::Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            EventAction::Created => "Created",
            EventAction::Updated => "Updated",
            EventAction::Deleted => "Deleted",
        }
    }
}

/// `<Entity><Action>Topic`, e.g. `ReviewCreatedTopic`.
pub fn event_topic(kind: EntityKind, action: EventAction) -> String {
    format!("{}{}Topic", kind.topic_stem(), action.as_str())
}

#[derive(Debug, Clone, Serialize)]
struct EventEnvelope<'a> {
    data: &'a Value,
    session: Option<&'a Session>,
    #[serde(rename = "_eventId")]
    event_id: String,
    #[serde(rename = "_requestId")]
    request_id: &'a str,
}

pub struct ServicePublisher {
    bus: Arc<dyn MessageBus>,
}

impl ServicePublisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Publish once, fire and forget. Returns the event id on success.
    pub async fn publish(
        &self,
        kind: EntityKind,
        action: EventAction,
        data: &Value,
        session: Option<&Session>,
        request_id: &str,
    ) -> Option<String> {
        let topic = event_topic(kind, action);
        let envelope = EventEnvelope {
            data,
            session,
            event_id: Uuid::new_v4().to_string(),
            request_id,
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(
                    target = "review_engagement::events",
                    topic = %topic,
                    error = %err,
                    "Failed to encode event"
                );
                counter!("review_engagement_events_failed_total", "topic" => topic).increment(1);
                return None;
            }
        };

        match self.bus.publish(&topic, payload).await {
            Ok(()) => {
                debug!(
                    target = "review_engagement::events",
                    topic = %topic,
                    event_id = %envelope.event_id,
                    request_id,
                    "Published event"
                );
                counter!("review_engagement_events_published_total", "topic" => topic)
                    .increment(1);
                Some(envelope.event_id)
            }
            Err(err) => {
                warn!(
                    target = "review_engagement::events",
                    topic = %topic,
                    request_id,
                    error = %err,
                    "Failed to publish event"
                );
                counter!("review_engagement_events_failed_total", "topic" => topic).increment(1);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_entity_and_action() {
        assert_eq!(
            event_topic(EntityKind::Review, EventAction::Created),
            "ReviewCreatedTopic"
        );
        assert_eq!(
            event_topic(EntityKind::EngagementEvent, EventAction::Created),
            "EngagementeventCreatedTopic"
        );
        assert_eq!(
            event_topic(EntityKind::Recommendation, EventAction::Deleted),
            "RecommendationDeletedTopic"
        );
    }
}
