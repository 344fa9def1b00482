//! Wire types shared by every transport of the review-engagement service.
//!
//! REST, gRPC and the request queue all carry the same JSON envelope; only the
//! framing around it differs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Paging metadata attached to list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub page_number: u64,
    pub page_row_count: u64,
    pub total_row_count: u64,
    pub page_count: u64,
}

/// Uniform success envelope.
///
/// The entity payload is keyed by `data_name` (and `old_<data_name>` for
/// updates), so it lives in the flattened `payload` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub status: String,
    pub status_code: u16,
    pub elapsed_ms: u64,
    pub request_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub data_name: String,
    pub method: String,
    pub action: String,
    pub app_version: String,
    pub row_count: u64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_permissions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_data_values: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_data_values: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_result: Option<Value>,
    #[serde(rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ResponseEnvelope {
    /// The primary entity payload (`<dataName>` key).
    pub fn data(&self) -> Option<&Value> {
        self.payload.get(&self.data_name)
    }

    /// The pre-update entity payload (`old_<dataName>` key).
    pub fn old_data(&self) -> Option<&Value> {
        self.payload.get(&format!("old_{}", self.data_name))
    }
}

/// JSON error body returned by REST and published on the response topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: String,
    pub status_code: u16,
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Metadata attached to every queue response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetadata {
    pub processing_time: u64,
    pub request_id: String,
    pub route: String,
}

/// Frame published to a response topic after handling a queued request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResponse {
    pub status: String,
    pub data: Value,
    pub metadata: QueueMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> ResponseEnvelope {
        let mut payload = Map::new();
        payload.insert("review".to_string(), serde_json::json!({"id": "r1"}));
        ResponseEnvelope {
            status: "OK".to_string(),
            status_code: 200,
            elapsed_ms: 3,
            request_id: "req-1".to_string(),
            user_id: Some("u1".to_string()),
            session_id: None,
            data_name: "review".to_string(),
            method: "GET".to_string(),
            action: "get".to_string(),
            app_version: "0.3.0".to_string(),
            row_count: 1,
            payload,
            paging: None,
            filters: None,
            ui_permissions: None,
            old_data_values: None,
            new_data_values: None,
            checkout_result: None,
            source: None,
        }
    }

    #[test]
    fn envelope_flattens_entity_under_data_name() {
        let value = serde_json::to_value(envelope()).expect("serialize envelope");
        assert_eq!(value["review"]["id"], "r1");
        assert_eq!(value["statusCode"], 200);
        assert!(value.get("paging").is_none());
        assert!(value.get("_source").is_none());
    }

    #[test]
    fn data_accessor_reads_flattened_key() {
        let env = envelope();
        assert_eq!(env.data().and_then(|v| v["id"].as_str()), Some("r1"));
        assert!(env.old_data().is_none());
    }
}
