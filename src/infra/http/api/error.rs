use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use review_engagement_api_types::ErrorBody;

use crate::application::error::{ErrorReport, ServiceError};

pub mod codes {
    pub const INVALID_JSON_BODY: &str = "errMsg_InvalidJsonBody";
    pub const INVALID_QUERY: &str = "errMsg_InvalidQueryString";
}

/// Status string carried by every error body.
pub const ERROR_STATUS: &str = "ERR";

/// Service error rendered as the shared JSON error body.
#[derive(Debug)]
pub struct ApiError {
    error: ServiceError,
    request_id: Option<String>,
}

impl ApiError {
    pub fn new(error: ServiceError, request_id: Option<String>) -> Self {
        Self { error, request_id }
    }

    pub fn body(&self) -> ErrorBody {
        error_body(&self.error, self.request_id.clone())
    }
}

pub fn error_body(error: &ServiceError, request_id: Option<String>) -> ErrorBody {
    ErrorBody {
        status: ERROR_STATUS.to_string(),
        status_code: error.status_code().as_u16(),
        error_code: error.error_code().to_string(),
        message: error.public_message(),
        request_id: error.request_id().map(str::to_string).or(request_id),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = self.body();
        let mut response = (status, Json(body)).into_response();
        let report = if status == StatusCode::INTERNAL_SERVER_ERROR {
            ErrorReport::from_error("infra::http::api", status, &self.error)
        } else {
            ErrorReport::from_message("infra::http::api", status, self.error.error_code())
        };
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_keep_their_own_request_id() {
        let err = ServiceError::server("boom", None, Some("req-1".into()));
        let body = ApiError::new(err, Some("req-2".into())).body();
        assert_eq!(body.status_code, 500);
        assert_eq!(body.request_id.as_deref(), Some("req-1"));
        assert_eq!(body.message, "Unexpected error occurred");
    }

    #[test]
    fn rejections_carry_their_message_key() {
        let body = error_body(&ServiceError::forbidden("errMsg_NotOwner"), None);
        assert_eq!(body.status, ERROR_STATUS);
        assert_eq!(body.status_code, 403);
        assert_eq!(body.error_code, "errMsg_NotOwner");
    }
}
