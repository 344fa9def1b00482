//! Single-record cache with secondary index sets.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::entities::{EntityKind, EntityRecord};

use super::backend::{CacheBackend, CacheError};
use super::config::CacheConfig;
use super::keys::{entity_key, index_key, membership_key};

const SOURCE: &str = "cache::entity";

pub struct EntityCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    enabled: bool,
}

impl EntityCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            ttl: config.entity_ttl,
            enabled: config.enable_entity_cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached record for `id`, or `None` on miss or backend failure.
    pub async fn get(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        if !self.enabled {
            return None;
        }
        match self.try_get(kind, id).await {
            Ok(Some(record)) => {
                counter!("review_engagement_ecache_hit_total", "entity" => kind.name())
                    .increment(1);
                Some(record)
            }
            Ok(None) => {
                counter!("review_engagement_ecache_miss_total", "entity" => kind.name())
                    .increment(1);
                None
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    entity = kind.name(),
                    id,
                    error = %err,
                    "Entity cache read failed"
                );
                None
            }
        }
    }

    async fn try_get(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>, CacheError> {
        let Some(raw) = self.backend.get(&entity_key(kind, id)).await? else {
            return Ok(None);
        };
        let record: EntityRecord = serde_json::from_str(&raw)?;
        Ok(Some(record))
    }

    /// Store a record and its index memberships. Inactive records are never
    /// cached; returns whether anything was written.
    pub async fn save(&self, kind: EntityKind, record: &EntityRecord) -> bool {
        if !self.enabled || !record.is_active() {
            return false;
        }
        let Some(id) = record.id() else {
            return false;
        };
        match self.try_save(kind, id, record).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    entity = kind.name(),
                    id,
                    error = %err,
                    "Entity cache write failed"
                );
                false
            }
        }
    }

    async fn try_save(
        &self,
        kind: EntityKind,
        id: &str,
        record: &EntityRecord,
    ) -> Result<(), CacheError> {
        // Index values may have changed since the last save.
        self.try_delete(kind, id).await?;

        let payload = serde_json::to_string(record)?;
        self.backend
            .set(&entity_key(kind, id), payload, Some(self.ttl))
            .await?;

        let mut joined = Vec::new();
        for field in kind.index_fields() {
            match record.get(field) {
                None | Some(Value::Null) => continue,
                Some(value) => {
                    let key = index_key(kind, field, value);
                    self.backend.set_add(&key, &[id.to_string()]).await?;
                    joined.push(key);
                }
            }
        }
        if !joined.is_empty() {
            self.backend
                .set_add(&membership_key(kind, id), &joined)
                .await?;
        }
        debug!(target = SOURCE, entity = kind.name(), id, "Cached entity");
        Ok(())
    }

    /// Drop the record and its membership in every index set.
    pub async fn delete(&self, kind: EntityKind, id: &str) {
        if let Err(err) = self.try_delete(kind, id).await {
            warn!(
                target = SOURCE,
                entity = kind.name(),
                id,
                error = %err,
                "Entity cache delete failed"
            );
        }
    }

    async fn try_delete(&self, kind: EntityKind, id: &str) -> Result<(), CacheError> {
        let membership = membership_key(kind, id);
        let member = [id.to_string()];
        for index in self.backend.set_members(&membership).await? {
            self.backend.set_remove(&index, &member).await?;
        }
        self.backend
            .delete(&[entity_key(kind, id), membership])
            .await?;
        Ok(())
    }

    /// Records matching every `field = value` pair, resolved through index sets.
    ///
    /// `None` when a field is not indexed or the backend fails; the caller
    /// must then go to the store.
    pub async fn select(
        &self,
        kind: EntityKind,
        query: &[(&str, &Value)],
    ) -> Option<Vec<EntityRecord>> {
        if !self.enabled || query.is_empty() {
            return None;
        }
        if query
            .iter()
            .any(|(field, _)| !kind.index_fields().contains(field))
        {
            return None;
        }
        match self.try_select(kind, query).await {
            Ok(records) => Some(records),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    entity = kind.name(),
                    error = %err,
                    "Entity cache index lookup failed"
                );
                None
            }
        }
    }

    async fn try_select(
        &self,
        kind: EntityKind,
        query: &[(&str, &Value)],
    ) -> Result<Vec<EntityRecord>, CacheError> {
        let mut ids: Option<BTreeSet<String>> = None;
        for (field, value) in query {
            let members: BTreeSet<String> = self
                .backend
                .set_members(&index_key(kind, field, value))
                .await?
                .into_iter()
                .collect();
            ids = Some(match ids {
                None => members,
                Some(current) => current.intersection(&members).cloned().collect(),
            });
            if ids.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }

        let mut records = Vec::new();
        for id in ids.unwrap_or_default() {
            if let Some(record) = self.try_get(kind, &id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::memory::MemoryCacheBackend;

    fn cache() -> (Arc<MemoryCacheBackend>, EntityCache) {
        let config = CacheConfig::default();
        let backend = Arc::new(MemoryCacheBackend::new(&config));
        let cache = EntityCache::new(backend.clone(), &config);
        (backend, cache)
    }

    fn review(id: &str, book: &str, status: &str) -> EntityRecord {
        EntityRecord::from_value(json!({
            "id": id, "bookId": book, "status": status, "rating": 4, "isActive": true
        }))
        .expect("object")
    }

    #[tokio::test]
    async fn inactive_records_are_not_cached() {
        let (backend, cache) = cache();
        let mut record = review("r1", "b1", "PENDING");
        record.set("isActive", json!(false));
        assert!(!cache.save(EntityKind::Review, &record).await);
        assert!(backend.is_empty());
        assert!(cache.get(EntityKind::Review, "r1").await.is_none());
    }

    #[tokio::test]
    async fn select_intersects_index_sets() {
        let (_, cache) = cache();
        cache.save(EntityKind::Review, &review("r1", "b1", "PENDING")).await;
        cache.save(EntityKind::Review, &review("r2", "b1", "APPROVED")).await;
        cache.save(EntityKind::Review, &review("r3", "b2", "PENDING")).await;

        let book = json!("b1");
        let status = json!("PENDING");
        let found = cache
            .select(EntityKind::Review, &[("bookId", &book), ("status", &status)])
            .await
            .expect("indexed query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), Some("r1"));
    }

    #[tokio::test]
    async fn unindexed_fields_are_not_answered() {
        let (_, cache) = cache();
        let rating = json!(4);
        assert!(
            cache
                .select(EntityKind::Review, &[("rating", &rating)])
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn delete_clears_index_memberships() {
        let (backend, cache) = cache();
        cache.save(EntityKind::Review, &review("r1", "b1", "PENDING")).await;
        cache.delete(EntityKind::Review, "r1").await;
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn resave_moves_record_between_index_sets() {
        let (_, cache) = cache();
        cache.save(EntityKind::Review, &review("r1", "b1", "PENDING")).await;
        cache.save(EntityKind::Review, &review("r1", "b1", "APPROVED")).await;

        let pending = json!("PENDING");
        let approved = json!("APPROVED");
        let stale = cache
            .select(EntityKind::Review, &[("status", &pending)])
            .await
            .expect("indexed");
        let fresh = cache
            .select(EntityKind::Review, &[("status", &approved)])
            .await
            .expect("indexed");
        assert!(stale.is_empty());
        assert_eq!(fresh.len(), 1);
    }
}
