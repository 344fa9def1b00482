//! Per-request state owned by exactly one in-flight request.

use std::time::Instant;

use serde_json::{Map, Value};

use crate::application::{
    auth::ShareGrant,
    pagination::PageRequest,
    repos::{SortKey, WhereClause},
    routes::RouteSpec,
};
use crate::domain::{entities::EntityRecord, session::Session, types::TransportKind};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub transport: TransportKind,
    pub route: &'static RouteSpec,
    pub session: Option<Session>,
    pub share_grant: Option<ShareGrant>,
    /// Merged parameters from path, query and body, in that precedence order.
    pub params: Map<String, Value>,
    pub id: Option<String>,
    pub where_clause: WhereClause,
    pub data_clause: Map<String, Value>,
    /// Per-item payloads for iterated bulk updates.
    pub items: Vec<Map<String, Value>>,
    pub pagination: Option<PageRequest>,
    pub sort: Vec<SortKey>,
    pub select: Vec<String>,
    pub checkout_result: Option<Value>,
    /// Target row fetched before an update or delete.
    pub instance: Option<EntityRecord>,
    pub is_owner: bool,
    pub started: Instant,
}

impl RequestContext {
    pub fn new(
        request_id: impl Into<String>,
        transport: TransportKind,
        route: &'static RouteSpec,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            transport,
            route,
            session: None,
            share_grant: None,
            params: Map::new(),
            id: None,
            where_clause: WhereClause::new(),
            data_clause: Map::new(),
            items: Vec::new(),
            pagination: None,
            sort: Vec::new(),
            select: Vec::new(),
            checkout_result: None,
            instance: None,
            is_owner: false,
            started: Instant::now(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|session| session.user_id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|session| session.session_id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn is_admin(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_admin)
    }

    /// Whether the caller owns `record`. Records without an owner belong to
    /// nobody.
    pub fn owns(&self, record: &EntityRecord) -> bool {
        match (self.user_id(), record.owner()) {
            (Some(user), Some(owner)) => user == owner,
            _ => false,
        }
    }

    /// Ownership gate used by get, update and delete. A share grant for the
    /// record stands in for ownership.
    pub fn may_access(&self, record: &EntityRecord) -> bool {
        !self.route.ownership_check
            || self.is_admin()
            || self.owns(record)
            || self
                .share_grant
                .as_ref()
                .is_some_and(|grant| grant.authorizes(self.route.name, record.id()))
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::routes::RouteTable;

    fn context(route: &str, user: Option<&str>) -> RequestContext {
        let route = RouteTable::new().get(route).expect("route");
        let mut ctx = RequestContext::new("req-1", TransportKind::Rest, route);
        ctx.session = user.map(|user| Session {
            session_id: "s1".into(),
            user_id: user.into(),
            ..Session::default()
        });
        ctx
    }

    fn record(owner: &str) -> EntityRecord {
        EntityRecord::from_value(json!({"id": "r1", "_owner": owner})).expect("record")
    }

    #[test]
    fn owned_routes_gate_on_owner() {
        let ctx = context("updateReview", Some("u1"));
        assert!(ctx.may_access(&record("u1")));
        assert!(!ctx.may_access(&record("u2")));
    }

    #[test]
    fn public_routes_skip_ownership() {
        let ctx = context("getReview", None);
        assert!(ctx.may_access(&record("u2")));
        assert!(ctx.user_id().is_none());
    }

    #[test]
    fn admins_bypass_ownership() {
        let mut ctx = context("updateReview", Some("u1"));
        if let Some(session) = ctx.session.as_mut() {
            session.role_id = Some("admin".into());
        }
        assert!(ctx.may_access(&record("u2")));
    }
}
