//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

/// Moderation state of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 3] = [
        ReviewStatus::Pending,
        ReviewStatus::Approved,
        ReviewStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Approved => "APPROVED",
            ReviewStatus::Rejected => "REJECTED",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "Pending moderation",
            ReviewStatus::Approved => "Approved",
            ReviewStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value))
    }
}

/// The five operations every route resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrudType {
    Create,
    Get,
    GetList,
    Update,
    Delete,
}

impl CrudType {
    pub fn as_str(self) -> &'static str {
        match self {
            CrudType::Create => "create",
            CrudType::Get => "get",
            CrudType::GetList => "getList",
            CrudType::Update => "update",
            CrudType::Delete => "delete",
        }
    }

    /// Mutating operations publish an event and invalidate caches.
    pub fn is_mutation(self) -> bool {
        matches!(self, CrudType::Create | CrudType::Update | CrudType::Delete)
    }
}

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Rest,
    Kafka,
    Grpc,
    Mcp,
    Socket,
    Cron,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Rest => "rest",
            TransportKind::Kafka => "kafka",
            TransportKind::Grpc => "grpc",
            TransportKind::Mcp => "mcp",
            TransportKind::Socket => "socket",
            TransportKind::Cron => "cron",
        }
    }
}
