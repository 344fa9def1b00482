//! Cache key layout.
//!
//! Entity cache:
//! - `ecache:<entity>:<id>` holds the record JSON
//! - `ecache:<entity>-by-<field>:<value>` is the set of ids sharing a value
//! - `ecache:<entity>-indexes:<id>` lists the index sets an id joined
//!
//! Query cache:
//! - `qcache:<table>:<sha256>` holds one cached page
//! - `qcache:<table>:index` is the set of live page keys for the table
//!
//! Parameters parked while a caller logs in live under `params:<id>`.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::application::{pagination::PageRequest, repos::WhereClause};
use crate::domain::entities::EntityKind;

pub const ENTITY_PREFIX: &str = "ecache";
pub const QUERY_PREFIX: &str = "qcache";
pub const ENUM_PREFIX: &str = "enum";
pub const PARAMS_PREFIX: &str = "params";

pub fn entity_key(kind: EntityKind, id: &str) -> String {
    format!("{ENTITY_PREFIX}:{}:{id}", kind.name())
}

pub fn index_key(kind: EntityKind, field: &str, value: &Value) -> String {
    format!(
        "{ENTITY_PREFIX}:{}-by-{field}:{}",
        kind.name(),
        index_value(value)
    )
}

pub fn membership_key(kind: EntityKind, id: &str) -> String {
    format!("{ENTITY_PREFIX}:{}-indexes:{id}", kind.name())
}

/// Strings index by their content, everything else by its JSON text.
pub fn index_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn query_namespace(kind: EntityKind) -> String {
    format!("{QUERY_PREFIX}:{}:", kind.table())
}

pub fn query_registry_key(kind: EntityKind) -> String {
    format!("{}index", query_namespace(kind))
}

/// Deterministic key over `(table, normalized filter, pagination, variant)`.
///
/// `variant` folds in anything else that shapes the page, such as the sort
/// order or projection.
pub fn query_key(
    kind: EntityKind,
    filter: &WhereClause,
    page: Option<&PageRequest>,
    variant: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.table().as_bytes());
    hasher.update([0u8]);
    hasher.update(filter.to_json().to_string().as_bytes());
    hasher.update([0u8]);
    match page {
        Some(page) => {
            hasher.update(page.page_number.to_be_bytes());
            hasher.update(page.page_row_count.to_be_bytes());
        }
        None => hasher.update(b"all"),
    }
    hasher.update([0u8]);
    hasher.update(variant.as_bytes());
    format!("{}{}", query_namespace(kind), hex::encode(hasher.finalize()))
}

pub fn enum_key(dictionary: &str) -> String {
    format!("{ENUM_PREFIX}:{dictionary}")
}

pub fn params_key(id: &str) -> String {
    format!("{PARAMS_PREFIX}:{id}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::repos::Condition;

    #[test]
    fn entity_keys_follow_layout() {
        assert_eq!(entity_key(EntityKind::Review, "r1"), "ecache:review:r1");
        assert_eq!(
            index_key(EntityKind::Review, "bookId", &json!("b1")),
            "ecache:review-by-bookId:b1"
        );
        assert_eq!(
            index_key(EntityKind::Review, "rating", &json!(4)),
            "ecache:review-by-rating:4"
        );
        assert_eq!(
            membership_key(EntityKind::EngagementEvent, "e1"),
            "ecache:engagementEvent-indexes:e1"
        );
    }

    #[test]
    fn query_keys_are_stable_and_scoped() {
        let filter = WhereClause::new()
            .with("status", Condition::Eq(json!("PENDING")))
            .with("bookId", Condition::Eq(json!("b1")));
        let reordered = WhereClause::new()
            .with("bookId", Condition::Eq(json!("b1")))
            .with("status", Condition::Eq(json!("PENDING")));
        let page = PageRequest::new(1, 10);
        let a = query_key(EntityKind::Review, &filter, Some(&page), "");
        let b = query_key(EntityKind::Review, &reordered, Some(&page), "");
        assert_eq!(a, b);
        assert!(a.starts_with("qcache:reviews:"));
        assert_eq!(a.len(), "qcache:reviews:".len() + 64);

        let next = PageRequest::new(2, 10);
        assert_ne!(a, query_key(EntityKind::Review, &filter, Some(&next), ""));
    }
}
