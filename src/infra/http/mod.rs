mod api;
mod middleware;

pub use api::{ApiState, build_api_router, error::error_body};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Router, middleware as axum_middleware};

use crate::application::error::ErrorReport;
use crate::application::repos::RepoError;

/// REST surface: the route table plus health probes, wrapped in request-id
/// and response-logging middleware.
pub fn build_router(state: ApiState) -> Router {
    let health = Router::new()
        .route("/health", get(health))
        .route("/health/db", get(db_health))
        .with_state(state.clone());

    build_api_router(state)
        .merge(health)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn db_health(State(state): State<ApiState>) -> Response {
    db_health_response(state.service.commands.store.ping().await)
}

fn db_health_response(result: Result<(), RepoError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
