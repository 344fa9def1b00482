#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use review_engagement::{
    application::{
        auth::ShareGrant,
        commands::CommandServices,
        enums::EnumResolver,
        events::ServicePublisher,
        hooks::HookRegistry,
        search::SearchIndexer,
        service::{ServiceContext, ServiceOptions},
    },
    cache::{CacheConfig, CacheLayer},
    domain::session::Session,
    infra::{
        bus::MemoryBus,
        db::MemoryEntityStore,
        http::{ApiState, build_router},
        search::MemorySearchIndex,
    },
};
use serde_json::Value;
use tower::ServiceExt;

pub struct TestApp {
    pub service: Arc<ServiceContext>,
    pub store: Arc<MemoryEntityStore>,
    pub bus: Arc<MemoryBus>,
    pub search: Arc<MemorySearchIndex>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_options(ServiceOptions::default())
    }

    pub fn with_options(options: ServiceOptions) -> Self {
        let store = Arc::new(MemoryEntityStore::new());
        let bus = Arc::new(MemoryBus::new());
        let search = Arc::new(MemorySearchIndex::default());
        let caches = CacheLayer::in_memory(&CacheConfig::default());
        let indexer = SearchIndexer::new(search.clone(), "it");
        let enums = Arc::new(EnumResolver::new(caches.backend.clone(), indexer.clone()));
        let commands = Arc::new(CommandServices {
            store: store.clone(),
            caches,
            search: indexer,
            publisher: ServicePublisher::new(bus.clone()),
            hooks: HookRegistry::with_defaults(),
        });
        let service = Arc::new(ServiceContext::new(
            commands,
            enums,
            "integration-session-secret",
            "integration-share-secret",
            options,
        ));
        Self {
            service,
            store,
            bus,
            search,
        }
    }

    pub fn router(&self) -> Router {
        build_router(ApiState::new(self.service.clone()))
    }

    pub fn token(&self, user: &str, role: Option<&str>) -> String {
        let session = Session {
            session_id: format!("session-{user}"),
            user_id: user.to_string(),
            role_id: role.map(str::to_string),
            email_verified: true,
            mobile_verified: true,
            ..Session::default()
        };
        self.service
            .sessions
            .issue(&session, Duration::from_secs(600))
            .expect("session token should sign")
    }

    pub fn share_token(&self, routes: &[&str], record_id: Option<&str>) -> String {
        let grant = ShareGrant {
            routes: routes.iter().map(|route| route.to_string()).collect(),
            record_id: record_id.map(str::to_string),
        };
        self.service
            .shares
            .issue(&grant, Duration::from_secs(600))
            .expect("share token should sign")
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be json")
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request should build")
}
