//! List-query result cache and its invalidator.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use review_engagement_api_types::Paging;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::application::repos::WhereClause;
use crate::domain::entities::{EntityKind, EntityRecord};

use super::backend::{CacheBackend, CacheError};
use super::config::CacheConfig;
use super::keys::{query_namespace, query_registry_key};

const SOURCE: &str = "cache::query";

/// One cached list page plus the filter that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPage {
    pub filter: Value,
    pub rows: Vec<EntityRecord>,
    pub total_row_count: u64,
    pub paging: Option<Paging>,
    pub filters: Option<Value>,
    pub ui_permissions: Option<Vec<String>>,
}

pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    enabled: bool,
}

impl QueryCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            ttl: config.query_ttl,
            enabled: config.enable_query_cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn read(&self, kind: EntityKind, key: &str) -> Option<CachedPage> {
        if !self.enabled {
            return None;
        }
        let result: Result<Option<CachedPage>, CacheError> = async {
            match self.backend.get(key).await? {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        }
        .await;
        match result {
            Ok(Some(page)) => {
                counter!("review_engagement_qcache_hit_total", "table" => kind.table())
                    .increment(1);
                Some(page)
            }
            Ok(None) => {
                counter!("review_engagement_qcache_miss_total", "table" => kind.table())
                    .increment(1);
                None
            }
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "Query cache read failed");
                None
            }
        }
    }

    pub async fn write(&self, kind: EntityKind, key: &str, page: &CachedPage) {
        if !self.enabled {
            return;
        }
        let result: Result<(), CacheError> = async {
            let payload = serde_json::to_string(page)?;
            self.backend.set(key, payload, Some(self.ttl)).await?;
            self.backend
                .set_add(&query_registry_key(kind), &[key.to_string()])
                .await
        }
        .await;
        if let Err(err) = result {
            warn!(target = SOURCE, key, error = %err, "Query cache write failed");
        }
    }
}

/// Drops cached pages a write may have affected.
pub struct QueryCacheInvalidator {
    backend: Arc<dyn CacheBackend>,
}

impl QueryCacheInvalidator {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Remove every page whose filter matches, or whose rows contain, any of
    /// `records`. Returns how many pages were dropped.
    pub async fn invalidate_records(&self, kind: EntityKind, records: &[&EntityRecord]) -> usize {
        match self.try_invalidate_records(kind, records).await {
            Ok(dropped) => {
                debug!(
                    target = SOURCE,
                    table = kind.table(),
                    dropped,
                    "Invalidated matching query pages"
                );
                dropped
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    table = kind.table(),
                    error = %err,
                    "Query cache invalidation failed, flushing namespace"
                );
                self.invalidate_namespace(kind).await
            }
        }
    }

    async fn try_invalidate_records(
        &self,
        kind: EntityKind,
        records: &[&EntityRecord],
    ) -> Result<usize, CacheError> {
        let registry = query_registry_key(kind);
        let mut stale = Vec::new();
        for key in self.backend.set_members(&registry).await? {
            let Some(raw) = self.backend.get(&key).await? else {
                stale.push(key);
                continue;
            };
            let page: CachedPage = serde_json::from_str(&raw)?;
            if page_affected(&page, records) {
                stale.push(key);
            }
        }
        if stale.is_empty() {
            return Ok(0);
        }
        let dropped = self.backend.delete(&stale).await?;
        self.backend.set_remove(&registry, &stale).await?;
        counter!("review_engagement_qcache_invalidate_total", "mode" => "exact")
            .increment(dropped);
        Ok(dropped as usize)
    }

    /// Drop every cached page for the table.
    pub async fn invalidate_namespace(&self, kind: EntityKind) -> usize {
        let result: Result<u64, CacheError> = async {
            let keys = self
                .backend
                .keys_with_prefix(&query_namespace(kind))
                .await?;
            self.backend.delete(&keys).await
        }
        .await;
        match result {
            Ok(dropped) => {
                counter!("review_engagement_qcache_invalidate_total", "mode" => "namespace")
                    .increment(dropped);
                debug!(
                    target = SOURCE,
                    table = kind.table(),
                    dropped,
                    "Flushed query cache namespace"
                );
                dropped as usize
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    table = kind.table(),
                    error = %err,
                    "Query cache namespace flush failed"
                );
                0
            }
        }
    }
}

fn page_affected(page: &CachedPage, records: &[&EntityRecord]) -> bool {
    // An unreadable filter cannot be reasoned about.
    let Ok(filter) = WhereClause::from_json(&page.filter) else {
        return true;
    };
    records.iter().any(|record| {
        filter.matches(record)
            || page
                .rows
                .iter()
                .any(|row| row.id().is_some() && row.id() == record.id())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::pagination::PageRequest;
    use crate::application::repos::Condition;
    use crate::cache::keys::query_key;
    use crate::cache::memory::MemoryCacheBackend;

    fn setup() -> (Arc<MemoryCacheBackend>, QueryCache, QueryCacheInvalidator) {
        let config = CacheConfig::default();
        let backend = Arc::new(MemoryCacheBackend::new(&config));
        (
            backend.clone(),
            QueryCache::new(backend.clone(), &config),
            QueryCacheInvalidator::new(backend),
        )
    }

    fn record(value: Value) -> EntityRecord {
        EntityRecord::from_value(value).expect("object")
    }

    async fn cache_page(cache: &QueryCache, filter: &WhereClause) -> String {
        let key = query_key(EntityKind::Review, filter, Some(&PageRequest::new(1, 10)), "");
        let page = CachedPage {
            filter: filter.to_json(),
            rows: Vec::new(),
            total_row_count: 0,
            paging: None,
            filters: None,
            ui_permissions: None,
        };
        cache.write(EntityKind::Review, &key, &page).await;
        key
    }

    #[tokio::test]
    async fn exact_invalidation_keeps_unrelated_pages() {
        let (_, cache, invalidator) = setup();
        let pending = WhereClause::new().with("status", Condition::Eq(json!("PENDING")));
        let rejected = WhereClause::new().with("status", Condition::Eq(json!("REJECTED")));
        let pending_key = cache_page(&cache, &pending).await;
        let rejected_key = cache_page(&cache, &rejected).await;

        let changed = record(json!({"id": "r1", "status": "PENDING"}));
        let dropped = invalidator
            .invalidate_records(EntityKind::Review, &[&changed])
            .await;

        assert_eq!(dropped, 1);
        assert!(cache.read(EntityKind::Review, &pending_key).await.is_none());
        assert!(cache.read(EntityKind::Review, &rejected_key).await.is_some());
    }

    #[tokio::test]
    async fn namespace_flush_drops_every_page() {
        let (backend, cache, invalidator) = setup();
        cache_page(&cache, &WhereClause::new()).await;
        cache_page(
            &cache,
            &WhereClause::new().with("bookId", Condition::Eq(json!("b1"))),
        )
        .await;

        invalidator.invalidate_namespace(EntityKind::Review).await;
        let left = backend
            .keys_with_prefix("qcache:reviews:")
            .await
            .expect("scan");
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn pages_listing_the_record_are_dropped_even_if_filter_no_longer_matches() {
        let (_, cache, invalidator) = setup();
        let filter = WhereClause::new().with("status", Condition::Eq(json!("PENDING")));
        let key = query_key(EntityKind::Review, &filter, None, "");
        let page = CachedPage {
            filter: filter.to_json(),
            rows: vec![record(json!({"id": "r1", "status": "PENDING"}))],
            total_row_count: 1,
            paging: None,
            filters: None,
            ui_permissions: None,
        };
        cache.write(EntityKind::Review, &key, &page).await;

        let moved = record(json!({"id": "r1", "status": "APPROVED"}));
        invalidator
            .invalidate_records(EntityKind::Review, &[&moved])
            .await;
        assert!(cache.read(EntityKind::Review, &key).await.is_none());
    }
}
