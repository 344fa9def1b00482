//! Redis cache backend over a multiplexed async connection.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::info;

use super::backend::{CacheBackend, CacheError};

pub struct RedisCacheBackend {
    connection: MultiplexedConnection,
}

impl RedisCacheBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::backend)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::backend)?;
        info!(
            target = "review_engagement::cache::redis",
            "Connected to redis cache backend"
        );
        Ok(Self { connection })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(CacheError::backend)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(CacheError::backend),
            None => conn.set(key, value).await.map_err(CacheError::backend),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        conn.del(keys).await.map_err(CacheError::backend)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        conn.sadd(key, members).await.map_err(CacheError::backend)
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        conn.srem(key, members).await.map_err(CacheError::backend)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        conn.smembers(key).await.map_err(CacheError::backend)
    }

    async fn hash_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, CacheError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)
    }

    async fn hash_set(&self, key: &str, entries: &[(String, String)]) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        conn.hset_multiple(key, entries)
            .await
            .map_err(CacheError::backend)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        redis::cmd("KEYS")
            .arg(format!("{prefix}*"))
            .query_async(&mut conn)
            .await
            .map_err(CacheError::backend)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(CacheError::backend)
    }
}
