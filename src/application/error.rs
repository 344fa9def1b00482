use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use serde_json::Value;
use thiserror::Error;

use crate::{
    application::repos::RepoError, config::LoadError, domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Error taxonomy every transport maps onto its own status codes.
///
/// The `code` strings are public message keys consumed by clients
/// (e.g. `errMsg_RecordNotFoundToUpdate`).
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("not authenticated: {code}")]
    NotAuthenticated { code: String },
    #[error("forbidden: {code}")]
    Forbidden { code: String },
    #[error("bad request: {code}")]
    BadRequest { code: String, detail: Option<String> },
    #[error("validation failed: {message}")]
    Validation { message: String },
    #[error("not found: {code}")]
    NotFound { code: String },
    #[error("already exists: {code}")]
    AlreadyExists { code: String },
    #[error("server error: {message}")]
    Server {
        message: String,
        checkout_result: Option<Value>,
        request_id: Option<String>,
    },
}

/// Kind discriminant used by transport mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    NotAuthenticated,
    Forbidden,
    BadRequest,
    Validation,
    NotFound,
    AlreadyExists,
    Server,
}

impl ServiceErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceErrorKind::NotAuthenticated => "not_authenticated",
            ServiceErrorKind::Forbidden => "forbidden",
            ServiceErrorKind::BadRequest => "bad_request",
            ServiceErrorKind::Validation => "validation",
            ServiceErrorKind::NotFound => "not_found",
            ServiceErrorKind::AlreadyExists => "already_exists",
            ServiceErrorKind::Server => "server",
        }
    }
}

impl ServiceError {
    pub fn not_authenticated(code: impl Into<String>) -> Self {
        Self::NotAuthenticated { code: code.into() }
    }

    pub fn forbidden(code: impl Into<String>) -> Self {
        Self::Forbidden { code: code.into() }
    }

    pub fn bad_request(code: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            detail: None,
        }
    }

    pub fn bad_request_with(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>) -> Self {
        Self::NotFound { code: code.into() }
    }

    pub fn already_exists(code: impl Into<String>) -> Self {
        Self::AlreadyExists { code: code.into() }
    }

    /// Wrap an unclassified failure once, keeping correlation data.
    pub fn server(
        error: impl std::fmt::Display,
        checkout_result: Option<Value>,
        request_id: Option<String>,
    ) -> Self {
        Self::Server {
            message: error.to_string(),
            checkout_result,
            request_id,
        }
    }

    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            ServiceError::NotAuthenticated { .. } => ServiceErrorKind::NotAuthenticated,
            ServiceError::Forbidden { .. } => ServiceErrorKind::Forbidden,
            ServiceError::BadRequest { .. } => ServiceErrorKind::BadRequest,
            ServiceError::Validation { .. } => ServiceErrorKind::Validation,
            ServiceError::NotFound { .. } => ServiceErrorKind::NotFound,
            ServiceError::AlreadyExists { .. } => ServiceErrorKind::AlreadyExists,
            ServiceError::Server { .. } => ServiceErrorKind::Server,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ServiceErrorKind::NotAuthenticated => StatusCode::UNAUTHORIZED,
            ServiceErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ServiceErrorKind::BadRequest | ServiceErrorKind::Validation => StatusCode::BAD_REQUEST,
            ServiceErrorKind::NotFound => StatusCode::NOT_FOUND,
            ServiceErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ServiceErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Public message key; server errors never leak their detail.
    pub fn error_code(&self) -> &str {
        match self {
            ServiceError::NotAuthenticated { code }
            | ServiceError::Forbidden { code }
            | ServiceError::BadRequest { code, .. }
            | ServiceError::NotFound { code }
            | ServiceError::AlreadyExists { code } => code,
            ServiceError::Validation { .. } => "errMsg_ValidationFailed",
            ServiceError::Server { .. } => "errMsg_ServerError",
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Validation { message } => message.clone(),
            ServiceError::BadRequest {
                detail: Some(detail),
                ..
            } => detail.clone(),
            ServiceError::Server { .. } => "Unexpected error occurred".to_string(),
            other => other.error_code().to_string(),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ServiceError::Server { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Attach a request id to a server error that has none yet.
    pub fn with_request_id(self, id: &str) -> Self {
        match self {
            ServiceError::Server {
                message,
                checkout_result,
                request_id: None,
            } => ServiceError::Server {
                message,
                checkout_result,
                request_id: Some(id.to_string()),
            },
            other => other,
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Validation { message } => ServiceError::Validation { message },
            DomainError::UnknownEntity { name } => {
                ServiceError::bad_request_with("errMsg_UnknownEntity", name)
            }
            DomainError::Invariant { message } => ServiceError::server(message, None, None),
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::Duplicate { .. } => ServiceError::already_exists("errMsg_RecordAlreadyExists"),
            RepoError::InvalidInput { message } => ServiceError::validation(message),
            other => ServiceError::server(other, None, None),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
