//! Declarative route table shared by every transport.

use std::collections::HashMap;

use crate::domain::{entities::EntityKind, types::CrudType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl RouteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Delete => "DELETE",
        }
    }
}

/// How a mutating route addresses its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    /// One record addressed by id.
    Single,
    /// One statement over every row matching the filter.
    Batch,
    /// Item-by-item iteration; `silent` drops failed items instead of raising.
    Each { silent: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub name: &'static str,
    pub entity: EntityKind,
    pub crud: CrudType,
    pub method: RouteMethod,
    pub path: &'static str,
    /// Path parameter holding the record id.
    pub id_param: Option<&'static str>,
    pub login_required: bool,
    pub ownership_check: bool,
    pub bulk: BulkMode,
    pub soft_delete: bool,
    pub exclude_cqrs: bool,
    pub null_result: bool,
    pub default_page_row_count: Option<u64>,
    /// Roles allowed to call the route at all; empty means everyone.
    pub required_roles: &'static [&'static str],
    /// Request parameters promoted to equality filters on list routes.
    pub filter_fields: &'static [&'static str],
    /// Fields coerced to numbers in list output.
    pub aggregate_fields: &'static [&'static str],
}

const MODERATOR_ROLES: &[&str] = &["admin", "superAdmin", "moderator"];

impl RouteSpec {
    const fn new(
        name: &'static str,
        entity: EntityKind,
        crud: CrudType,
        method: RouteMethod,
        path: &'static str,
    ) -> Self {
        Self {
            name,
            entity,
            crud,
            method,
            path,
            id_param: None,
            login_required: true,
            ownership_check: false,
            bulk: BulkMode::Single,
            soft_delete: false,
            exclude_cqrs: false,
            null_result: false,
            default_page_row_count: None,
            required_roles: &[],
            filter_fields: &[],
            aggregate_fields: &[],
        }
    }

    const fn by_id(mut self, param: &'static str) -> Self {
        self.id_param = Some(param);
        self
    }

    const fn public(mut self) -> Self {
        self.login_required = false;
        self
    }

    const fn owned(mut self) -> Self {
        self.ownership_check = true;
        self
    }

    const fn bulk(mut self, mode: BulkMode) -> Self {
        self.bulk = mode;
        self
    }

    const fn soft(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    const fn roles(mut self, roles: &'static [&'static str]) -> Self {
        self.required_roles = roles;
        self
    }

    const fn filters(mut self, fields: &'static [&'static str]) -> Self {
        self.filter_fields = fields;
        self
    }

    const fn aggregates(mut self, fields: &'static [&'static str]) -> Self {
        self.aggregate_fields = fields;
        self
    }

    const fn page_rows(mut self, rows: u64) -> Self {
        self.default_page_row_count = Some(rows);
        self
    }

    const fn without_cqrs(mut self) -> Self {
        self.exclude_cqrs = true;
        self
    }

    const fn nullable(mut self) -> Self {
        self.null_result = true;
        self
    }

    /// Envelope key for this route's payload.
    pub fn data_name(&self) -> &'static str {
        match self.crud {
            CrudType::GetList => self.entity.plural(),
            _ if self.bulk != BulkMode::Single => self.entity.plural(),
            _ => self.entity.name(),
        }
    }
}

use BulkMode::{Batch, Each};
use CrudType::{Create, Delete, Get, GetList, Update};
use EntityKind::{EngagementEvent, Recommendation, Review};
use RouteMethod::{Delete as DEL, Get as GET, Patch as PATCH, Post as POST};

pub static ROUTES: &[RouteSpec] = &[
    RouteSpec::new("createReview", Review, Create, POST, "/reviews"),
    RouteSpec::new("getReview", Review, Get, GET, "/reviews/{reviewId}")
        .by_id("reviewId")
        .public(),
    RouteSpec::new("listReviews", Review, GetList, GET, "/reviews")
        .public()
        .filters(&["bookId", "userId", "status", "rating"])
        .aggregates(&["rating"]),
    RouteSpec::new("updateReview", Review, Update, PATCH, "/reviews/{reviewId}")
        .by_id("reviewId")
        .owned(),
    RouteSpec::new("deleteReview", Review, Delete, DEL, "/reviews/{reviewId}")
        .by_id("reviewId")
        .owned()
        .soft(),
    RouteSpec::new("updateReviewsBulk", Review, Update, PATCH, "/reviews")
        .bulk(Batch)
        .roles(MODERATOR_ROLES),
    RouteSpec::new("moderateReviews", Review, Update, PATCH, "/reviews/moderate")
        .bulk(Each { silent: false })
        .roles(MODERATOR_ROLES),
    RouteSpec::new(
        "createRecommendation",
        Recommendation,
        Create,
        POST,
        "/recommendations",
    ),
    RouteSpec::new(
        "getRecommendation",
        Recommendation,
        Get,
        GET,
        "/recommendations/{recommendationId}",
    )
    .by_id("recommendationId")
    .owned(),
    RouteSpec::new(
        "listRecommendations",
        Recommendation,
        GetList,
        GET,
        "/recommendations",
    )
    .filters(&["userId", "generatedBy"])
    .page_rows(10),
    RouteSpec::new(
        "updateRecommendation",
        Recommendation,
        Update,
        PATCH,
        "/recommendations/{recommendationId}",
    )
    .by_id("recommendationId")
    .owned(),
    RouteSpec::new(
        "deleteRecommendation",
        Recommendation,
        Delete,
        DEL,
        "/recommendations/{recommendationId}",
    )
    .by_id("recommendationId")
    .owned(),
    RouteSpec::new(
        "refreshRecommendations",
        Recommendation,
        Update,
        PATCH,
        "/recommendations/refresh",
    )
    .bulk(Each { silent: true })
    .roles(MODERATOR_ROLES),
    RouteSpec::new(
        "createEngagementEvent",
        EngagementEvent,
        Create,
        POST,
        "/engagementevents",
    ),
    RouteSpec::new(
        "getEngagementEvent",
        EngagementEvent,
        Get,
        GET,
        "/engagementevents/{engagementEventId}",
    )
    .by_id("engagementEventId")
    .owned()
    .without_cqrs()
    .nullable(),
    RouteSpec::new(
        "listEngagementEvents",
        EngagementEvent,
        GetList,
        GET,
        "/engagementevents",
    )
    .filters(&["userId", "bookId", "eventType"]),
    RouteSpec::new(
        "updateEngagementEvent",
        EngagementEvent,
        Update,
        PATCH,
        "/engagementevents/{engagementEventId}",
    )
    .by_id("engagementEventId")
    .owned(),
    RouteSpec::new(
        "deleteEngagementEvent",
        EngagementEvent,
        Delete,
        DEL,
        "/engagementevents/{engagementEventId}",
    )
    .by_id("engagementEventId")
    .owned()
    .soft(),
    RouteSpec::new(
        "deleteEngagementEvents",
        EngagementEvent,
        Delete,
        DEL,
        "/engagementevents",
    )
    .bulk(Batch)
    .soft()
    .roles(MODERATOR_ROLES),
];

/// Name-indexed view over [`ROUTES`].
pub struct RouteTable {
    by_name: HashMap<&'static str, &'static RouteSpec>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            by_name: ROUTES.iter().map(|route| (route.name, route)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&'static RouteSpec> {
        self.by_name.get(name).copied()
    }

    pub fn all(&self) -> &'static [RouteSpec] {
        ROUTES
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
