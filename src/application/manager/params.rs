//! Transport frames and the parameter reader for each of them.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::domain::{session::Session, types::TransportKind};

/// Where a session token was found; decides cookie handling on REST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    Header,
    Cookie,
    Query,
    Frame,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<(String, TokenOrigin)>,
    pub share_token: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RestRequest {
    pub request_id: Option<String>,
    pub path: Map<String, Value>,
    pub query: Map<String, Value>,
    pub body: Value,
    pub bearer: Option<String>,
    pub cookie: Option<String>,
    pub share_header: Option<String>,
}

/// One JSON frame from the request topic:
/// `{ route, requestId?, token?, shareToken?, params }`.
#[derive(Debug, Clone, Default)]
pub struct QueueRequest {
    pub frame: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct GrpcRequest {
    pub params: Map<String, Value>,
    /// Lower-cased ASCII metadata entries.
    pub metadata: HashMap<String, String>,
}

/// Tool invocations arrive already authenticated by the host.
#[derive(Debug, Clone, Default)]
pub struct ToolRequest {
    pub arguments: Map<String, Value>,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Default)]
pub struct SocketRequest {
    pub token: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct CronRequest {
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub enum TransportRequest {
    Rest(RestRequest),
    Kafka(QueueRequest),
    Grpc(GrpcRequest),
    Mcp(ToolRequest),
    Socket(SocketRequest),
    Cron(CronRequest),
}

const SHARE_TOKEN_PARAM: &str = "shareToken";
const SHARE_TOKEN_ALIAS: &str = "share_token";
const SHARE_TOKEN_HEADER: &str = "x-share-token";
const REQUEST_ID_HEADER: &str = "x-request-id";

impl TransportRequest {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportRequest::Rest(_) => TransportKind::Rest,
            TransportRequest::Kafka(_) => TransportKind::Kafka,
            TransportRequest::Grpc(_) => TransportKind::Grpc,
            TransportRequest::Mcp(_) => TransportKind::Mcp,
            TransportRequest::Socket(_) => TransportKind::Socket,
            TransportRequest::Cron(_) => TransportKind::Cron,
        }
    }

    pub fn credentials(&self) -> Credentials {
        match self {
            TransportRequest::Rest(rest) => Credentials {
                token: rest
                    .bearer
                    .clone()
                    .map(|token| (token, TokenOrigin::Header))
                    .or_else(|| {
                        string_param(&rest.query, "access_token")
                            .map(|token| (token, TokenOrigin::Query))
                    })
                    .or_else(|| rest.cookie.clone().map(|token| (token, TokenOrigin::Cookie))),
                share_token: string_param(&rest.query, SHARE_TOKEN_PARAM)
                    .or_else(|| string_param(&rest.query, SHARE_TOKEN_ALIAS))
                    .or_else(|| rest.share_header.clone()),
                request_id: rest.request_id.clone(),
            },
            TransportRequest::Kafka(queue) => Credentials {
                token: string_param(&queue.frame, "token")
                    .map(|token| (token, TokenOrigin::Frame)),
                share_token: string_param(&queue.frame, SHARE_TOKEN_PARAM),
                request_id: string_param(&queue.frame, "requestId"),
            },
            TransportRequest::Grpc(grpc) => Credentials {
                token: grpc
                    .metadata
                    .get("authorization")
                    .map(|value| strip_bearer(value))
                    .map(|token| (token, TokenOrigin::Header)),
                share_token: grpc.metadata.get(SHARE_TOKEN_HEADER).cloned(),
                request_id: grpc.metadata.get(REQUEST_ID_HEADER).cloned(),
            },
            TransportRequest::Mcp(tool) => Credentials {
                token: None,
                share_token: None,
                request_id: string_param(&tool.arguments, "requestId"),
            },
            TransportRequest::Socket(socket) => Credentials {
                token: socket
                    .token
                    .clone()
                    .map(|token| (token, TokenOrigin::Frame)),
                share_token: socket
                    .payload
                    .get(SHARE_TOKEN_PARAM)
                    .and_then(Value::as_str)
                    .map(str::to_string),
                request_id: socket
                    .payload
                    .get("requestId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            TransportRequest::Cron(_) => Credentials::default(),
        }
    }

    /// Session supplied by the transport itself rather than by a token.
    pub fn trusted_session(&self) -> Option<Session> {
        match self {
            TransportRequest::Mcp(tool) => tool.session.clone(),
            TransportRequest::Cron(_) => Some(Session {
                session_id: "cron".to_string(),
                user_id: "system".to_string(),
                role_id: Some("admin".to_string()),
                email_verified: true,
                mobile_verified: true,
                ..Session::default()
            }),
            _ => None,
        }
    }

    /// Flatten the frame into one parameter map.
    pub fn into_params(self) -> Map<String, Value> {
        match self {
            TransportRequest::Rest(rest) => read_rest(rest),
            TransportRequest::Kafka(queue) => read_queue(queue),
            TransportRequest::Grpc(grpc) => grpc.params,
            TransportRequest::Mcp(tool) => tool.arguments,
            TransportRequest::Socket(socket) => read_socket(socket),
            TransportRequest::Cron(cron) => cron.params,
        }
    }
}

/// Body first, then query, then path; later sources win. A top-level array
/// body becomes `items`.
fn read_rest(rest: RestRequest) -> Map<String, Value> {
    let mut params = match rest.body {
        Value::Object(body) => body,
        Value::Array(items) => {
            let mut params = Map::new();
            params.insert("items".to_string(), Value::Array(items));
            params
        }
        _ => Map::new(),
    };
    for (key, value) in rest.query {
        if matches!(key.as_str(), "access_token" | SHARE_TOKEN_PARAM | SHARE_TOKEN_ALIAS) {
            continue;
        }
        params.insert(key, value);
    }
    params.extend(rest.path);
    params
}

fn read_queue(queue: QueueRequest) -> Map<String, Value> {
    match queue.frame.get("params") {
        Some(Value::Object(params)) => params.clone(),
        _ => Map::new(),
    }
}

fn read_socket(socket: SocketRequest) -> Map<String, Value> {
    match socket.payload {
        Value::Object(mut payload) => match payload.remove("data") {
            Some(Value::Object(data)) => data,
            _ => {
                payload.remove(SHARE_TOKEN_PARAM);
                payload.remove("requestId");
                payload
            }
        },
        _ => Map::new(),
    }
}

fn string_param(params: &Map<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn strip_bearer(value: &str) -> String {
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn rest_path_beats_query_beats_body() {
        let request = TransportRequest::Rest(RestRequest {
            path: object(json!({"reviewId": "from-path"})),
            query: object(json!({"reviewId": "from-query", "pageNumber": "2", "access_token": "t"})),
            body: json!({"reviewId": "from-body", "status": "APPROVED"}),
            ..RestRequest::default()
        });
        let params = request.into_params();
        assert_eq!(params["reviewId"], "from-path");
        assert_eq!(params["pageNumber"], "2");
        assert_eq!(params["status"], "APPROVED");
        assert!(params.get("access_token").is_none());
    }

    #[test]
    fn rest_array_body_becomes_items() {
        let request = TransportRequest::Rest(RestRequest {
            body: json!([{"id": "r1"}]),
            ..RestRequest::default()
        });
        assert_eq!(request.into_params()["items"][0]["id"], "r1");
    }

    #[test]
    fn rest_credentials_prefer_the_header() {
        let request = TransportRequest::Rest(RestRequest {
            bearer: Some("header".into()),
            cookie: Some("cookie".into()),
            ..RestRequest::default()
        });
        assert_eq!(
            request.credentials().token,
            Some(("header".to_string(), TokenOrigin::Header))
        );
    }

    #[test]
    fn grpc_metadata_carries_credentials() {
        let mut metadata = HashMap::new();
        metadata.insert("authorization".to_string(), "Bearer abc".to_string());
        metadata.insert("x-request-id".to_string(), "req-9".to_string());
        let request = TransportRequest::Grpc(GrpcRequest {
            params: Map::new(),
            metadata,
        });
        let credentials = request.credentials();
        assert_eq!(credentials.token.map(|(token, _)| token).as_deref(), Some("abc"));
        assert_eq!(credentials.request_id.as_deref(), Some("req-9"));
    }

    #[test]
    fn queue_frames_nest_params() {
        let request = TransportRequest::Kafka(QueueRequest {
            frame: object(json!({
                "route": "getReview", "requestId": "q1", "params": {"reviewId": "r1"}
            })),
        });
        assert_eq!(request.credentials().request_id.as_deref(), Some("q1"));
        assert_eq!(request.into_params()["reviewId"], "r1");
    }

    #[test]
    fn cron_runs_as_a_trusted_admin() {
        let request = TransportRequest::Cron(CronRequest::default());
        assert_eq!(request.kind(), TransportKind::Cron);
        assert!(request.trusted_session().is_some_and(|s| s.is_admin()));
    }
}
