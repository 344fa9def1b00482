//! Review-engagement cache system.
//!
//! Two caches share one Redis-shaped backend:
//!
//! - **Entity cache**: single records by id, with secondary index sets
//! - **Query cache**: whole list pages keyed by a filter fingerprint
//!
//! Writes invalidate after the store commits. Failures are logged and never
//! reach the caller; TTLs bound staleness.

mod backend;
mod config;
mod entity;
mod keys;
mod lock;
mod memory;
mod query;
mod redis_backend;

use std::sync::Arc;

use tracing::info;

pub(crate) use lock::{rw_read, rw_write};

pub use backend::{CacheBackend, CacheError};
pub use config::{CacheBackendKind, CacheConfig};
pub use entity::EntityCache;
pub use keys::{
    entity_key, enum_key, index_key, membership_key, params_key, query_key, query_namespace,
    query_registry_key,
};
pub use memory::MemoryCacheBackend;
pub use query::{CachedPage, QueryCache, QueryCacheInvalidator};
pub use redis_backend::RedisCacheBackend;

/// Backend plus the caches layered on it.
#[derive(Clone)]
pub struct CacheLayer {
    pub backend: Arc<dyn CacheBackend>,
    pub entities: Arc<EntityCache>,
    pub queries: Arc<QueryCache>,
    pub invalidator: Arc<QueryCacheInvalidator>,
}

impl CacheLayer {
    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            entities: Arc::new(EntityCache::new(backend.clone(), config)),
            queries: Arc::new(QueryCache::new(backend.clone(), config)),
            invalidator: Arc::new(QueryCacheInvalidator::new(backend.clone())),
            backend,
        }
    }

    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::with_backend(Arc::new(MemoryCacheBackend::new(config)), config)
    }

    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        match (config.backend, config.redis_url.as_deref()) {
            (CacheBackendKind::Redis, Some(url)) => {
                let backend = RedisCacheBackend::connect(url).await?;
                Ok(Self::with_backend(Arc::new(backend), config))
            }
            (CacheBackendKind::Redis, None) => Err(CacheError::Backend(
                "redis backend selected without cache.redis_url".to_string(),
            )),
            (CacheBackendKind::Memory, _) => {
                info!(
                    target = "review_engagement::cache",
                    capacity = config.memory_capacity,
                    "Using in-memory cache backend"
                );
                Ok(Self::in_memory(config))
            }
        }
    }
}
