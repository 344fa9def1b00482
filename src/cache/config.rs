//! Cache configuration.
//!
//! Controls the entity cache, the query cache and the backend both share.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_ENTITY_TTL_SECS: u64 = 3600;
const DEFAULT_QUERY_TTL_SECS: u64 = 300;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    /// Serve single-record reads from `ecache:*` keys.
    pub enable_entity_cache: bool,
    /// Serve list reads from `qcache:*` keys.
    pub enable_query_cache: bool,
    pub entity_ttl: Duration,
    pub query_ttl: Duration,
    /// Maximum keys held by the in-memory backend.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: None,
            enable_entity_cache: true,
            enable_query_cache: true,
            entity_ttl: Duration::from_secs(DEFAULT_ENTITY_TTL_SECS),
            query_ttl: Duration::from_secs(DEFAULT_QUERY_TTL_SECS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            enable_entity_cache: settings.enable_entity_cache,
            enable_query_cache: settings.enable_query_cache,
            entity_ttl: settings.entity_ttl,
            query_ttl: settings.query_ttl,
            memory_capacity: settings.memory_capacity.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, CacheBackendKind::Memory);
        assert!(config.enable_entity_cache);
        assert!(config.enable_query_cache);
        assert_eq!(config.query_ttl, Duration::from_secs(300));
        assert_eq!(config.memory_capacity, 10_000);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }
}
