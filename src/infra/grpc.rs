//! gRPC transport: a single `Invoke` RPC that dispatches by route name.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};
use tracing::info;

use crate::application::error::{ServiceError, ServiceErrorKind};
use crate::application::manager::{GrpcRequest, TransportRequest};
use crate::application::service::ServiceContext;

pub mod proto {
    tonic::include_proto!("review_engagement.v1");
}

use proto::review_engagement_server::{ReviewEngagement, ReviewEngagementServer};
use proto::{InvokeRequest, InvokeResponse};

const SOURCE: &str = "review_engagement::infra::grpc";
const INVALID_PARAMS: &str = "errMsg_paramsMustBeJsonObject";

pub const REQUEST_ID_KEY: &str = "requestid";
pub const PROCESSING_TIME_KEY: &str = "processingtime";
pub const ENDPOINT_KEY: &str = "endpoint";
pub const ERROR_CODE_KEY: &str = "errorcode";

#[derive(Clone)]
pub struct GrpcService {
    service: Arc<ServiceContext>,
}

impl GrpcService {
    pub fn new(service: Arc<ServiceContext>) -> Self {
        Self { service }
    }

    pub fn into_server(self) -> ReviewEngagementServer<Self> {
        ReviewEngagementServer::new(self)
    }

    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), tonic::transport::Error> {
        info!(target = SOURCE, %addr, "gRPC server listening");
        Server::builder()
            .add_service(self.into_server())
            .serve_with_shutdown(addr, shutdown)
            .await
    }
}

pub fn status_code(kind: ServiceErrorKind) -> Code {
    match kind {
        ServiceErrorKind::Validation | ServiceErrorKind::BadRequest => Code::InvalidArgument,
        ServiceErrorKind::NotFound => Code::NotFound,
        ServiceErrorKind::AlreadyExists => Code::AlreadyExists,
        ServiceErrorKind::NotAuthenticated => Code::Unauthenticated,
        ServiceErrorKind::Forbidden => Code::PermissionDenied,
        ServiceErrorKind::Server => Code::Internal,
    }
}

struct Echo<'a> {
    request_id: &'a str,
    elapsed_ms: u64,
    endpoint: &'a str,
}

impl Echo<'_> {
    fn write(&self, metadata: &mut MetadataMap) {
        let entries = [
            (REQUEST_ID_KEY, self.request_id.to_string()),
            (PROCESSING_TIME_KEY, self.elapsed_ms.to_string()),
            (ENDPOINT_KEY, self.endpoint.to_string()),
        ];
        for (key, value) in entries {
            if let Ok(value) = MetadataValue::try_from(value.as_str()) {
                metadata.insert(key, value);
            }
        }
    }
}

fn to_status(error: &ServiceError, echo: &Echo<'_>) -> Status {
    let mut status = Status::new(status_code(error.kind()), error.public_message());
    echo.write(status.metadata_mut());
    if let Ok(code) = MetadataValue::try_from(error.error_code()) {
        status.metadata_mut().insert(ERROR_CODE_KEY, code);
    }
    status
}

fn read_metadata(metadata: &MetadataMap) -> HashMap<String, String> {
    metadata
        .clone()
        .into_headers()
        .iter()
        .filter_map(|(key, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (key.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn parse_params(raw: &str) -> Result<Map<String, Value>, ServiceError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(_) => Err(ServiceError::bad_request(INVALID_PARAMS)),
        Err(err) => Err(ServiceError::bad_request_with(INVALID_PARAMS, err.to_string())),
    }
}

#[tonic::async_trait]
impl ReviewEngagement for GrpcService {
    async fn invoke(
        &self,
        request: Request<InvokeRequest>,
    ) -> Result<Response<InvokeResponse>, Status> {
        let metadata = read_metadata(request.metadata());
        let InvokeRequest { route, params_json } = request.into_inner();
        let params = parse_params(&params_json).map_err(|err| {
            let request_id = metadata.get("x-request-id").cloned().unwrap_or_default();
            to_status(
                &err,
                &Echo {
                    request_id: &request_id,
                    elapsed_ms: 0,
                    endpoint: &route,
                },
            )
        })?;

        let response = self
            .service
            .dispatch(&route, TransportRequest::Grpc(GrpcRequest { params, metadata }))
            .await;
        let echo = Echo {
            request_id: &response.request_id,
            elapsed_ms: response.elapsed_ms,
            endpoint: &route,
        };
        let envelope = response.result.map_err(|err| to_status(&err, &echo))?;
        let envelope_json = serde_json::to_string(&envelope).map_err(|err| {
            to_status(
                &ServiceError::server(err, None, Some(envelope.request_id.clone())),
                &echo,
            )
        })?;

        let mut reply = Response::new(InvokeResponse {
            status_code: u32::from(envelope.status_code),
            data_name: envelope.data_name.clone(),
            envelope_json,
        });
        echo.write(reply.metadata_mut());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::manager::test_support::token;
    use crate::application::service::test_support::service;

    fn invoke_request(route: &str, params: Value, bearer: Option<&str>) -> Request<InvokeRequest> {
        let mut request = Request::new(InvokeRequest {
            route: route.to_string(),
            params_json: params.to_string(),
        });
        if let Some(token) = bearer {
            let value = MetadataValue::try_from(format!("Bearer {token}").as_str()).expect("ascii");
            request.metadata_mut().insert("authorization", value);
        }
        request
    }

    #[tokio::test]
    async fn invoke_creates_and_echoes_metadata() {
        let (service, _) = service();
        let token = token(&service, "u1", None);
        let grpc = GrpcService::new(Arc::new(service));
        let reply = grpc
            .invoke(invoke_request(
                "createReview",
                json!({"bookId": "b1", "rating": 5}),
                Some(&token),
            ))
            .await
            .expect("invoke");
        assert_eq!(
            reply.metadata().get(ENDPOINT_KEY).and_then(|v| v.to_str().ok()),
            Some("createReview")
        );
        assert!(reply.metadata().get(REQUEST_ID_KEY).is_some());
        let body = reply.into_inner();
        assert_eq!(body.status_code, 201);
        assert_eq!(body.data_name, "review");
        let envelope: Value = serde_json::from_str(&body.envelope_json).expect("json");
        assert_eq!(envelope["review"]["bookId"], "b1");
    }

    #[tokio::test]
    async fn missing_login_maps_to_unauthenticated() {
        let (service, _) = service();
        let grpc = GrpcService::new(Arc::new(service));
        let status = grpc
            .invoke(invoke_request("createReview", json!({"bookId": "b1"}), None))
            .await
            .expect_err("login required");
        assert_eq!(status.code(), Code::Unauthenticated);
        assert!(status.metadata().get(REQUEST_ID_KEY).is_some());
    }

    #[tokio::test]
    async fn non_object_params_are_invalid_arguments() {
        let (service, _) = service();
        let grpc = GrpcService::new(Arc::new(service));
        let status = grpc
            .invoke(invoke_request("listReviews", json!([1, 2]), None))
            .await
            .expect_err("array params");
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn kinds_map_to_grpc_codes() {
        assert_eq!(status_code(ServiceErrorKind::Validation), Code::InvalidArgument);
        assert_eq!(status_code(ServiceErrorKind::Forbidden), Code::PermissionDenied);
        assert_eq!(status_code(ServiceErrorKind::Server), Code::Internal);
    }
}
