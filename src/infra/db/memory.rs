//! Process-local entity store for tests and database-less runs.

use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    },
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::application::repos::{EntityStore, FindOptions, RepoError, SortKey, WhereClause};
use crate::cache::{rw_read, rw_write};
use crate::domain::entities::{EntityKind, EntityRecord};

const SOURCE: &str = "review_engagement::infra::db::memory";

/// Rows per entity kind in insertion order.
#[derive(Default)]
pub struct MemoryEntityStore {
    tables: RwLock<HashMap<EntityKind, Vec<EntityRecord>>>,
    calls: AtomicUsize,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row without counting it as a store call.
    pub fn seed(&self, kind: EntityKind, record: EntityRecord) {
        rw_write(&self.tables, SOURCE, "seed")
            .entry(kind)
            .or_default()
            .push(record);
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        rw_read(&self.tables, SOURCE, "len")
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, kind: EntityKind) -> bool {
        self.len(kind) == 0
    }

    /// Store operations served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn matching(&self, kind: EntityKind, filter: &WhereClause) -> Vec<EntityRecord> {
        rw_read(&self.tables, SOURCE, "matching")
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn compare_field(left: &EntityRecord, right: &EntityRecord, key: &SortKey) -> Ordering {
    let ordering = match (left.get(&key.field), right.get(&key.field)) {
        (Some(Value::Number(l)), Some(Value::Number(r))) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r))
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, _) => Ordering::Less,
        (_, Some(Value::Null) | None) => Ordering::Greater,
        _ => Ordering::Equal,
    };
    if key.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn find_one(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
    ) -> Result<Option<EntityRecord>, RepoError> {
        self.touch();
        Ok(self.matching(kind, filter).into_iter().next())
    }

    async fn find_many(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
        options: &FindOptions,
    ) -> Result<Vec<EntityRecord>, RepoError> {
        self.touch();
        let mut rows = self.matching(kind, filter);
        if !options.sort.is_empty() {
            rows.sort_by(|left, right| {
                options
                    .sort
                    .iter()
                    .map(|key| compare_field(left, right, key))
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }
        let offset = usize::try_from(options.offset).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .and_then(|limit| usize::try_from(limit).ok())
            .unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, kind: EntityKind, filter: &WhereClause) -> Result<u64, RepoError> {
        self.touch();
        Ok(self.matching(kind, filter).len() as u64)
    }

    async fn create(
        &self,
        kind: EntityKind,
        record: EntityRecord,
    ) -> Result<EntityRecord, RepoError> {
        self.touch();
        let mut tables = rw_write(&self.tables, SOURCE, "create");
        let rows = tables.entry(kind).or_default();
        if let Some(id) = record.id()
            && rows.iter().any(|row| row.id() == Some(id))
        {
            return Err(RepoError::Duplicate {
                constraint: format!("{}_pkey", kind.table()),
            });
        }
        rows.push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
        changes: &Map<String, Value>,
    ) -> Result<Vec<EntityRecord>, RepoError> {
        self.touch();
        let mut tables = rw_write(&self.tables, SOURCE, "update");
        let Some(rows) = tables.get_mut(&kind) else {
            return Ok(Vec::new());
        };
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|row| filter.matches(row)) {
            for (field, value) in changes {
                row.set(field.clone(), value.clone());
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn destroy(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
    ) -> Result<Vec<EntityRecord>, RepoError> {
        self.touch();
        let mut tables = rw_write(&self.tables, SOURCE, "destroy");
        let Some(rows) = tables.get_mut(&kind) else {
            return Ok(Vec::new());
        };
        let (removed, kept): (Vec<_>, Vec<_>) =
            rows.drain(..).partition(|row| filter.matches(row));
        *rows = kept;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::repos::Condition;

    fn record(value: Value) -> EntityRecord {
        EntityRecord::from_value(value).expect("record")
    }

    #[tokio::test]
    async fn find_many_sorts_then_pages() {
        let store = MemoryEntityStore::new();
        for (id, rating) in [("a", 3), ("b", 5), ("c", 1)] {
            store.seed(EntityKind::Review, record(json!({"id": id, "rating": rating})));
        }
        let options = FindOptions {
            offset: 1,
            limit: Some(1),
            sort: FindOptions::parse_sort("-rating"),
        };
        let rows = store
            .find_many(EntityKind::Review, &WhereClause::new(), &options)
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), Some("a"));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = MemoryEntityStore::new();
        store
            .create(EntityKind::Review, record(json!({"id": "r1"})))
            .await
            .expect("first insert");
        let err = store
            .create(EntityKind::Review, record(json!({"id": "r1"})))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, RepoError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn update_returns_rows_after_the_write() {
        let store = MemoryEntityStore::new();
        store.seed(EntityKind::Review, record(json!({"id": "r1", "status": "PENDING"})));
        store.seed(EntityKind::Review, record(json!({"id": "r2", "status": "PENDING"})));
        let mut changes = Map::new();
        changes.insert("status".into(), json!("APPROVED"));
        let rows = store
            .update(
                EntityKind::Review,
                &WhereClause::new().with("id", Condition::Eq(json!("r2"))),
                &changes,
            )
            .await
            .expect("update");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("status"), Some(&json!("APPROVED")));
    }

    #[tokio::test]
    async fn destroy_removes_only_matching_rows() {
        let store = MemoryEntityStore::new();
        store.seed(EntityKind::EngagementEvent, record(json!({"id": "e1", "userId": "u1"})));
        store.seed(EntityKind::EngagementEvent, record(json!({"id": "e2", "userId": "u2"})));
        let removed = store
            .destroy(
                EntityKind::EngagementEvent,
                &WhereClause::new().with("userId", Condition::Eq(json!("u1"))),
            )
            .await
            .expect("destroy");
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(EntityKind::EngagementEvent), 1);
    }
}
