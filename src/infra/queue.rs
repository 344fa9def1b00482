//! Request/response queue transport.
//!
//! Each frame on the request topic is `{ route, requestId?, token?,
//! shareToken?, params }`. The answer, success or failure, goes to the
//! response topic as a [`QueueResponse`].

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::StreamExt;
use review_engagement_api_types::{QueueMetadata, QueueResponse};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::bus::{BusError, MessageBus};
use crate::application::error::ServiceError;
use crate::application::manager::{QueueRequest, TransportRequest};
use crate::application::service::ServiceContext;
use crate::infra::http::error_body;

const SOURCE: &str = "review_engagement::infra::queue";
const INVALID_FRAME: &str = "errMsg_queueFrameMustBeJsonObject";
const MISSING_ROUTE: &str = "errMsg_routeIsRequired";

pub struct QueueConsumer {
    service: Arc<ServiceContext>,
    bus: Arc<dyn MessageBus>,
    request_topic: String,
    response_topic: String,
}

impl QueueConsumer {
    pub fn new(
        service: Arc<ServiceContext>,
        bus: Arc<dyn MessageBus>,
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
    ) -> Self {
        Self {
            service,
            bus,
            request_topic: request_topic.into(),
            response_topic: response_topic.into(),
        }
    }

    /// Consume until `shutdown` resolves, then wait for in-flight requests.
    pub async fn run(
        self: Arc<Self>,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), BusError> {
        let mut subscription = self.bus.subscribe(&self.request_topic).await?;
        info!(
            target = SOURCE,
            request_topic = %self.request_topic,
            response_topic = %self.response_topic,
            "Queue consumer started"
        );
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = subscription.next() => {
                    let Some(message) = message else { break };
                    let consumer = self.clone();
                    in_flight.spawn(async move { consumer.handle(&message.payload).await });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
        while in_flight.join_next().await.is_some() {}
        info!(target = SOURCE, "Queue consumer stopped");
        Ok(())
    }

    /// Answer one frame on the response topic.
    pub async fn handle(&self, payload: &[u8]) {
        let started = Instant::now();
        let reply = self.answer(payload, started).await;
        let bytes = match serde_json::to_vec(&reply) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(target = SOURCE, error = %err, "Queue response not serializable");
                return;
            }
        };
        match self.bus.publish(&self.response_topic, bytes).await {
            Ok(()) => debug!(
                target = SOURCE,
                request_id = %reply.metadata.request_id,
                route = %reply.metadata.route,
                status = %reply.status,
                "Queue response published"
            ),
            Err(err) => warn!(
                target = SOURCE,
                request_id = %reply.metadata.request_id,
                error = %err,
                "Queue response publish failed"
            ),
        }
    }

    async fn answer(&self, payload: &[u8], started: Instant) -> QueueResponse {
        let frame = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(frame)) => frame,
            Ok(_) => return rejected(ServiceError::bad_request(INVALID_FRAME), None, "", started),
            Err(err) => {
                return rejected(
                    ServiceError::bad_request_with(INVALID_FRAME, err.to_string()),
                    None,
                    "",
                    started,
                );
            }
        };
        let route = frame
            .get("route")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if route.is_empty() {
            let request_id = frame_request_id(&frame);
            return rejected(ServiceError::bad_request(MISSING_ROUTE), request_id, "", started);
        }

        let response = self
            .service
            .dispatch(&route, TransportRequest::Kafka(QueueRequest { frame }))
            .await;
        match response.result {
            Ok(envelope) => QueueResponse {
                status: envelope.status.clone(),
                data: serde_json::to_value(&envelope).unwrap_or(Value::Null),
                metadata: QueueMetadata {
                    processing_time: elapsed_ms(started),
                    request_id: response.request_id,
                    route,
                },
            },
            Err(err) => rejected(err, Some(response.request_id), &route, started),
        }
    }
}

fn frame_request_id(frame: &Map<String, Value>) -> Option<String> {
    frame
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn rejected(
    error: ServiceError,
    request_id: Option<String>,
    route: &str,
    started: Instant,
) -> QueueResponse {
    let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let body = error_body(&error, Some(request_id.clone()));
    QueueResponse {
        status: body.status.clone(),
        data: serde_json::to_value(&body).unwrap_or(Value::Null),
        metadata: QueueMetadata {
            processing_time: elapsed_ms(started),
            request_id,
            route: route.to_string(),
        },
    }
}
