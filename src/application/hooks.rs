//! Route-keyed clause and result hooks.
//!
//! The registry is built once at startup and handed to every command; nothing
//! registers hooks at request time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::application::{
    context::RequestContext,
    error::ServiceError,
    repos::{Condition, WhereClause},
};
use crate::domain::{
    entities::{EntityRecord, now_rfc3339},
    types::ReviewStatus,
};

pub type WhereHook =
    Arc<dyn Fn(&RequestContext, WhereClause) -> Result<WhereClause, ServiceError> + Send + Sync>;
pub type DataHook = Arc<
    dyn Fn(&RequestContext, Map<String, Value>) -> Result<Map<String, Value>, ServiceError>
        + Send
        + Sync,
>;
pub type ResultHook = Arc<dyn Fn(&RequestContext, EntityRecord) -> EntityRecord + Send + Sync>;

#[derive(Clone, Default)]
struct RouteHooks {
    where_hooks: Vec<WhereHook>,
    data_hooks: Vec<DataHook>,
    result_hooks: Vec<ResultHook>,
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    routes: HashMap<String, RouteHooks>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the service's built-in hooks.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.on_data("createReview", |ctx, mut data| {
            // Only moderators may create a review in a final state.
            if !ctx.is_admin() || !data.contains_key("status") {
                data.insert(
                    "status".to_string(),
                    Value::String(ReviewStatus::Pending.as_str().to_string()),
                );
            }
            fill_user_id(ctx, &mut data);
            Ok(data)
        });

        registry.on_data("createRecommendation", |ctx, mut data| {
            fill_user_id(ctx, &mut data);
            data.entry("generatedBy")
                .or_insert_with(|| Value::String("user".to_string()));
            Ok(data)
        });

        registry.on_data("createEngagementEvent", |ctx, mut data| {
            fill_user_id(ctx, &mut data);
            data.entry("eventTime")
                .or_insert_with(|| Value::String(now_rfc3339()));
            Ok(data)
        });

        registry.on_where("listRecommendations", |ctx, clause| {
            if ctx.is_admin() {
                return Ok(clause);
            }
            match ctx.user_id() {
                Some(user) => Ok(clause.with(
                    "userId",
                    Condition::Eq(Value::String(user.to_string())),
                )),
                None => Err(ServiceError::not_authenticated("errMsg_LoginRequired")),
            }
        });

        registry
    }

    pub fn on_where<F>(&mut self, route: &str, hook: F)
    where
        F: Fn(&RequestContext, WhereClause) -> Result<WhereClause, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.entry(route).where_hooks.push(Arc::new(hook));
    }

    pub fn on_data<F>(&mut self, route: &str, hook: F)
    where
        F: Fn(&RequestContext, Map<String, Value>) -> Result<Map<String, Value>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.entry(route).data_hooks.push(Arc::new(hook));
    }

    pub fn on_result<F>(&mut self, route: &str, hook: F)
    where
        F: Fn(&RequestContext, EntityRecord) -> EntityRecord + Send + Sync + 'static,
    {
        self.entry(route).result_hooks.push(Arc::new(hook));
    }

    fn entry(&mut self, route: &str) -> &mut RouteHooks {
        self.routes.entry(route.to_string()).or_default()
    }

    pub fn apply_where(
        &self,
        ctx: &RequestContext,
        clause: WhereClause,
    ) -> Result<WhereClause, ServiceError> {
        let Some(hooks) = self.routes.get(ctx.route.name) else {
            return Ok(clause);
        };
        hooks
            .where_hooks
            .iter()
            .try_fold(clause, |clause, hook| hook(ctx, clause))
    }

    pub fn apply_data(
        &self,
        ctx: &RequestContext,
        data: Map<String, Value>,
    ) -> Result<Map<String, Value>, ServiceError> {
        let Some(hooks) = self.routes.get(ctx.route.name) else {
            return Ok(data);
        };
        hooks
            .data_hooks
            .iter()
            .try_fold(data, |data, hook| hook(ctx, data))
    }

    /// Transpose one result row through the route's result hooks.
    pub fn apply_result(&self, ctx: &RequestContext, record: EntityRecord) -> EntityRecord {
        match self.routes.get(ctx.route.name) {
            Some(hooks) => hooks
                .result_hooks
                .iter()
                .fold(record, |record, hook| hook(ctx, record)),
            None => record,
        }
    }

    pub fn has_result_hooks(&self, route: &str) -> bool {
        self.routes
            .get(route)
            .is_some_and(|hooks| !hooks.result_hooks.is_empty())
    }
}

fn fill_user_id(ctx: &RequestContext, data: &mut Map<String, Value>) {
    if let Some(user) = ctx.user_id()
        && !data.contains_key("userId")
    {
        data.insert("userId".to_string(), Value::String(user.to_string()));
    }
}
