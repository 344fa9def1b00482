//! Key-value contract shared by the in-memory and Redis backends.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache payload could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("key `{key}` holds a different data type")]
    WrongType { key: String },
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Redis-shaped operations: strings, sets, hashes and prefix scans.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Returns how many keys existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), CacheError>;

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError>;

    async fn hash_get(&self, key: &str, fields: &[String])
    -> Result<Vec<Option<String>>, CacheError>;

    async fn hash_set(&self, key: &str, entries: &[(String, String)]) -> Result<(), CacheError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
