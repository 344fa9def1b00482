//! Transport-neutral request lifecycle.
//!
//! One [`ApiManager`] owns one request. Its stages run strictly in order:
//! login, parameter reading and shaping, role checks, the target-instance
//! checks for single writes, the command itself, the post-read checks,
//! enrichment and finally the envelope.

mod checks;
mod input;
mod output;
pub mod params;

use metrics::counter;
use review_engagement_api_types::ResponseEnvelope;
use tracing::{debug, info, warn};

use crate::application::{
    commands::{CommandOutcome, DbCommand},
    context::RequestContext,
    error::{ServiceError, ServiceErrorKind},
    routes::RouteSpec,
    service::ServiceContext,
};
use crate::domain::types::TransportKind;

pub use params::{
    Credentials, CronRequest, GrpcRequest, QueueRequest, RestRequest, SocketRequest,
    TokenOrigin, ToolRequest, TransportRequest,
};

const SOURCE: &str = "review_engagement::manager";

/// What the transport should do with the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CookieDirective {
    #[default]
    Keep,
    /// A token arrived on the query string; persist it.
    Set(String),
    /// The cookie token was rejected; drop it.
    Clear,
}

/// Result of one dispatched request.
#[derive(Debug)]
pub struct ApiResponse {
    pub request_id: String,
    pub route: Option<&'static RouteSpec>,
    pub result: Result<ResponseEnvelope, ServiceError>,
    pub cookie: CookieDirective,
    pub elapsed_ms: u64,
}

impl ApiResponse {
    pub fn failed(request_id: String, error: ServiceError) -> Self {
        Self {
            request_id,
            route: None,
            result: Err(error),
            cookie: CookieDirective::Keep,
            elapsed_ms: 0,
        }
    }

    pub fn status_code(&self) -> u16 {
        match &self.result {
            Ok(envelope) => envelope.status_code,
            Err(err) => err.status_code().as_u16(),
        }
    }
}

pub struct ApiManager<'a> {
    service: &'a ServiceContext,
    ctx: RequestContext,
    cookie: CookieDirective,
}

impl<'a> ApiManager<'a> {
    pub fn new(
        service: &'a ServiceContext,
        route: &'static RouteSpec,
        transport: TransportKind,
        request_id: String,
    ) -> Self {
        Self {
            service,
            ctx: RequestContext::new(request_id, transport, route),
            cookie: CookieDirective::Keep,
        }
    }

    pub async fn execute(mut self, request: TransportRequest) -> ApiResponse {
        let result = self.run(request).await;
        let elapsed_ms = self.ctx.elapsed_ms();
        let route = self.ctx.route;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        counter!(
            "review_engagement_requests_total",
            "transport" => self.ctx.transport.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        match &result {
            Ok(envelope) => debug!(
                target = SOURCE,
                request_id = %self.ctx.request_id,
                route = route.name,
                transport = self.ctx.transport.as_str(),
                rows = envelope.row_count,
                elapsed_ms,
                "Request completed"
            ),
            Err(err) if err.kind() == ServiceErrorKind::Server => warn!(
                target = SOURCE,
                request_id = %self.ctx.request_id,
                route = route.name,
                transport = self.ctx.transport.as_str(),
                error = %err,
                "Request failed"
            ),
            Err(err) => info!(
                target = SOURCE,
                request_id = %self.ctx.request_id,
                route = route.name,
                transport = self.ctx.transport.as_str(),
                code = err.error_code(),
                "Request rejected"
            ),
        }

        ApiResponse {
            request_id: self.ctx.request_id.clone(),
            route: Some(route),
            result: result.map_err(|err| err.with_request_id(&self.ctx.request_id)),
            cookie: self.cookie,
            elapsed_ms,
        }
    }

    async fn run(&mut self, request: TransportRequest) -> Result<ResponseEnvelope, ServiceError> {
        let credentials = request.credentials();
        let trusted = request.trusted_session();
        self.check_valid_login(&credentials, trusted)?;
        self.ctx.params = request.into_params();
        self.read_cached_parameters().await;
        self.transform_parameters()?;
        self.check_parameters()?;
        self.check_basic_auth()?;
        self.build_where_clause()?;
        self.fetch_instance().await?;
        self.check_instance()?;
        self.build_data_clause();

        let outcome = self.main_operation().await?;
        self.check_result(&outcome)?;
        let outcome = self.run_after_main_operation(outcome).await;
        Ok(self.build_output(outcome))
    }

    async fn main_operation(&self) -> Result<CommandOutcome, ServiceError> {
        DbCommand::new(&self.service.commands, self.ctx.route.crud)
            .execute(&self.ctx)
            .await
    }
}
