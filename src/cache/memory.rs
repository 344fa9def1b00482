//! In-process cache backend on a bounded LRU.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;

use super::backend::{CacheBackend, CacheError};
use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Set(BTreeSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

pub struct MemoryCacheBackend {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCacheBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(entries: &mut LruCache<String, Entry>, key: String, entry: Entry) {
        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != key
        {
            counter!("review_engagement_cache_evict_total").increment(1);
        }
    }

    /// Fetch a live entry, dropping it if its TTL elapsed.
    fn live<'a>(entries: &'a mut LruCache<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.peek(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.pop(key);
            return None;
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Stored::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            value: Stored::Text(value),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let mut entries = mutex_lock(&self.entries, SOURCE, "set");
        Self::insert(&mut entries, key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete");
        let removed = keys
            .iter()
            .filter(|key| entries.pop(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_add");
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Stored::Set(set),
                ..
            }) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
            }),
            None => {
                let entry = Entry {
                    value: Stored::Set(members.iter().cloned().collect()),
                    expires_at: None,
                };
                Self::insert(&mut entries, key.to_string(), entry);
                Ok(())
            }
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_remove");
        let emptied = match Self::live(&mut entries, key) {
            Some(Entry {
                value: Stored::Set(set),
                ..
            }) => {
                for member in members {
                    set.remove(member);
                }
                set.is_empty()
            }
            Some(_) => {
                return Err(CacheError::WrongType {
                    key: key.to_string(),
                });
            }
            None => false,
        };
        if emptied {
            entries.pop(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_members");
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Stored::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn hash_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "hash_get");
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Stored::Hash(hash),
                ..
            }) => Ok(fields.iter().map(|field| hash.get(field).cloned()).collect()),
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn hash_set(&self, key: &str, values: &[(String, String)]) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "hash_set");
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Stored::Hash(hash),
                ..
            }) => {
                hash.extend(values.iter().cloned());
                Ok(())
            }
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
            }),
            None => {
                let entry = Entry {
                    value: Stored::Hash(values.iter().cloned().collect()),
                    expires_at: None,
                };
                Self::insert(&mut entries, key.to_string(), entry);
                Ok(())
            }
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let entries = mutex_lock(&self.entries, SOURCE, "keys_with_prefix");
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(capacity: usize) -> MemoryCacheBackend {
        MemoryCacheBackend::new(&CacheConfig {
            memory_capacity: capacity,
            ..CacheConfig::default()
        })
    }

    #[tokio::test]
    async fn expired_values_read_as_missing() {
        let cache = backend(8);
        cache
            .set("k", "v".into(), Some(Duration::ZERO))
            .await
            .expect("set");
        assert_eq!(cache.get("k").await.expect("get"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn sets_drop_when_emptied() {
        let cache = backend(8);
        cache
            .set_add("s", &["a".into(), "b".into()])
            .await
            .expect("sadd");
        cache.set_remove("s", &["a".into()]).await.expect("srem");
        assert_eq!(cache.set_members("s").await.expect("members"), vec!["b"]);
        cache.set_remove("s", &["b".into()]).await.expect("srem");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let cache = backend(8);
        cache.set("k", "v".into(), None).await.expect("set");
        assert!(matches!(
            cache.set_add("k", &["m".into()]).await,
            Err(CacheError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recent() {
        let cache = backend(2);
        cache.set("a", "1".into(), None).await.expect("set a");
        cache.set("b", "2".into(), None).await.expect("set b");
        cache.get("a").await.expect("touch a");
        cache.set("c", "3".into(), None).await.expect("set c");
        assert_eq!(cache.get("b").await.expect("get b"), None);
        assert_eq!(cache.get("a").await.expect("get a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn prefix_scan_and_hash_fields() {
        let cache = backend(8);
        cache.set("qcache:reviews:1", "x".into(), None).await.expect("set");
        cache.set("qcache:books:1", "y".into(), None).await.expect("set");
        let keys = cache.keys_with_prefix("qcache:reviews:").await.expect("scan");
        assert_eq!(keys, vec!["qcache:reviews:1"]);

        cache
            .hash_set("enum:reviewStatus", &[("PENDING".into(), "Pending".into())])
            .await
            .expect("hset");
        let values = cache
            .hash_get("enum:reviewStatus", &["PENDING".into(), "GONE".into()])
            .await
            .expect("hget");
        assert_eq!(values, vec![Some("Pending".to_string()), None]);
    }
}
