pub mod error;
pub mod handlers;
pub mod state;

pub use state::ApiState;

use axum::{Extension, Router, routing::MethodFilter, routing::on};

use crate::application::routes::{ROUTES, RouteMethod};

fn method_filter(method: RouteMethod) -> MethodFilter {
    match method {
        RouteMethod::Get => MethodFilter::GET,
        RouteMethod::Post => MethodFilter::POST,
        RouteMethod::Patch => MethodFilter::PATCH,
        RouteMethod::Delete => MethodFilter::DELETE,
    }
}

/// One axum route per table entry. Entries sharing a path merge into a single
/// method router.
pub fn build_api_router(state: ApiState) -> Router {
    ROUTES
        .iter()
        .fold(Router::new(), |router, route| {
            router.route(
                route.path,
                on(method_filter(route.method), handlers::dispatch).layer(Extension(route)),
            )
        })
        .with_state(state)
}
