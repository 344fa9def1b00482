//! Transport-neutral entry point shared by REST, gRPC and the request queue.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::application::{
    auth::{SessionResolver, ShareTokens},
    commands::CommandServices,
    enums::EnumResolver,
    error::ServiceError,
    manager::{ApiManager, ApiResponse, TransportRequest},
    routes::{RouteSpec, RouteTable},
};
use crate::cache::{CacheError, params_key};
use crate::config::AuthSettings;

pub const ROUTE_NOT_FOUND: &str = "errMsg_RouteNotFound";
const DEFAULT_PAGE_ROW_COUNT: u64 = 20;
const DEFAULT_SESSION_COOKIE: &str = "access_token";

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub app_version: String,
    pub default_page_row_count: u64,
    pub root_tenant_id: Option<String>,
    pub require_email_verification: bool,
    pub require_mobile_verification: bool,
    pub session_cookie: String,
    pub login_url: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            default_page_row_count: DEFAULT_PAGE_ROW_COUNT,
            root_tenant_id: None,
            require_email_verification: false,
            require_mobile_verification: false,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            login_url: None,
        }
    }
}

impl ServiceOptions {
    pub fn from_settings(auth: &AuthSettings) -> Self {
        Self {
            default_page_row_count: auth.default_page_row_count.get(),
            root_tenant_id: auth.root_tenant_id.clone(),
            require_email_verification: auth.require_email_verification,
            require_mobile_verification: auth.require_mobile_verification,
            session_cookie: auth.session_cookie.clone(),
            login_url: auth.login_url.clone(),
            ..Self::default()
        }
    }
}

/// Use the configured secret, or a per-process random one so tokens from a
/// previous run stop verifying.
pub fn secret_or_ephemeral(secret: Option<&str>, name: &'static str) -> String {
    match secret {
        Some(secret) => secret.to_string(),
        None => {
            warn!(
                target = "review_engagement::service",
                secret = name,
                "No secret configured; using an ephemeral one"
            );
            Uuid::new_v4().simple().to_string()
        }
    }
}

pub struct ServiceContext {
    pub commands: Arc<CommandServices>,
    pub enums: Arc<EnumResolver>,
    pub sessions: SessionResolver,
    pub shares: ShareTokens,
    pub routes: RouteTable,
    pub options: ServiceOptions,
}

impl ServiceContext {
    pub fn new(
        commands: Arc<CommandServices>,
        enums: Arc<EnumResolver>,
        session_secret: &str,
        share_secret: &str,
        options: ServiceOptions,
    ) -> Self {
        Self {
            commands,
            enums,
            sessions: SessionResolver::new(session_secret),
            shares: ShareTokens::new(share_secret),
            routes: RouteTable::new(),
            options,
        }
    }

    pub fn route(&self, name: &str) -> Option<&'static RouteSpec> {
        self.routes.get(name)
    }

    /// Run one request through its route's lifecycle.
    pub async fn dispatch(&self, route: &str, request: TransportRequest) -> ApiResponse {
        let request_id = request
            .credentials()
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let Some(route) = self.route(route) else {
            return ApiResponse::failed(request_id, ServiceError::not_found(ROUTE_NOT_FOUND));
        };
        ApiManager::new(self, route, request.kind(), request_id)
            .execute(request)
            .await
    }

    /// Park parameters while the caller logs in; returns the `paramsKey`.
    pub async fn stash_parameters(
        &self,
        params: &Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, CacheError> {
        let id = Uuid::new_v4().simple().to_string();
        let raw = serde_json::to_string(params)?;
        self.commands
            .caches
            .backend
            .set(&params_key(&id), raw, Some(ttl))
            .await?;
        Ok(id)
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::manager::test_support::rest;
    use test_support::service;

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (service, _) = service();
        let response = service.dispatch("getBook", rest(None, json!({}), json!({}))).await;
        let err = response.result.expect_err("unknown route");
        assert_eq!(err.error_code(), ROUTE_NOT_FOUND);
        assert!(response.route.is_none());
    }

    #[tokio::test]
    async fn request_ids_are_echoed_or_generated() {
        let (service, _) = service();
        let request = TransportRequest::Kafka(crate::application::manager::QueueRequest {
            frame: crate::application::manager::test_support::into_map(json!({
                "requestId": "queue-7", "params": {}
            })),
        });
        let echoed = service.dispatch("listReviews", request).await;
        assert_eq!(echoed.request_id, "queue-7");

        let generated = service
            .dispatch("listReviews", rest(None, json!({}), json!({})))
            .await;
        assert!(Uuid::parse_str(&generated.request_id).is_ok());
    }
}
