//! Enum dictionary lookups: memory first, then the cache hash, then the
//! search index. Batches move between tiers as a whole.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::application::search::{SearchError, SearchIndexer};
use crate::cache::{CacheBackend, enum_key, rw_read, rw_write};
use crate::domain::types::ReviewStatus;

const SOURCE: &str = "application::enums";

pub const REVIEW_STATUS_DICTIONARY: &str = "reviewStatus";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumEntry {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl EnumEntry {
    fn render(&self, has_desc: bool) -> Value {
        if has_desc {
            json!({
                "value": self.id,
                "label": self.label,
                "description": self.description,
            })
        } else {
            Value::String(self.label.clone())
        }
    }

    fn from_document(document: &Value) -> Option<Self> {
        let id = match document.get("id")? {
            Value::String(id) => id.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let label = document
            .get("label")
            .or_else(|| document.get("name"))
            .and_then(Value::as_str)?
            .to_string();
        let description = document
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            id,
            label,
            description,
        })
    }
}

type Dictionary = HashMap<String, EnumEntry>;

pub struct EnumResolver {
    memory: RwLock<HashMap<String, Dictionary>>,
    cache: Arc<dyn CacheBackend>,
    search: SearchIndexer,
}

impl EnumResolver {
    pub fn new(cache: Arc<dyn CacheBackend>, search: SearchIndexer) -> Self {
        let resolver = Self {
            memory: RwLock::new(HashMap::new()),
            cache,
            search,
        };
        resolver.seed_builtin();
        resolver
    }

    fn seed_builtin(&self) {
        let entries = ReviewStatus::ALL
            .into_iter()
            .map(|status| EnumEntry {
                id: status.as_str().to_string(),
                label: status.label().to_string(),
                description: None,
            })
            .collect();
        self.replace_memory(REVIEW_STATUS_DICTIONARY, entries);
    }

    fn replace_memory(&self, dictionary: &str, entries: Vec<EnumEntry>) {
        let mut memory = rw_write(&self.memory, SOURCE, "replace_memory");
        let slot = memory.entry(dictionary.to_string()).or_default();
        for entry in entries {
            slot.insert(entry.id.clone(), entry);
        }
    }

    pub fn dictionaries(&self) -> Vec<String> {
        rw_read(&self.memory, SOURCE, "dictionaries")
            .keys()
            .cloned()
            .collect()
    }

    /// Resolve `id` (a scalar or an array of scalars) against `dictionary`.
    ///
    /// Null resolves to null and an empty array to an empty array. A single
    /// miss resolves to null; a batch with any miss on every tier resolves to
    /// an empty array.
    pub async fn get_enum_value(&self, id: &Value, dictionary: &str, has_desc: bool) -> Value {
        match id {
            Value::Null => Value::Null,
            Value::Array(ids) if ids.is_empty() => Value::Array(Vec::new()),
            Value::Array(ids) => {
                let keys: Option<Vec<String>> = ids.iter().map(scalar_key).collect();
                match keys {
                    Some(keys) => match self.resolve_batch(dictionary, &keys).await {
                        Some(entries) => Value::Array(
                            entries.iter().map(|entry| entry.render(has_desc)).collect(),
                        ),
                        None => Value::Array(Vec::new()),
                    },
                    None => Value::Array(Vec::new()),
                }
            }
            scalar => match scalar_key(scalar) {
                Some(key) => match self.resolve_batch(dictionary, &[key]).await {
                    Some(mut entries) => entries
                        .pop()
                        .map(|entry| entry.render(has_desc))
                        .unwrap_or(Value::Null),
                    None => Value::Null,
                },
                None => Value::Null,
            },
        }
    }

    async fn resolve_batch(&self, dictionary: &str, ids: &[String]) -> Option<Vec<EnumEntry>> {
        if let Some(entries) = self.from_memory(dictionary, ids) {
            return Some(entries);
        }
        if let Some(entries) = self.from_cache(dictionary, ids).await {
            return Some(entries);
        }
        self.from_search(dictionary, ids).await
    }

    fn from_memory(&self, dictionary: &str, ids: &[String]) -> Option<Vec<EnumEntry>> {
        let memory = rw_read(&self.memory, SOURCE, "from_memory");
        let entries = memory.get(dictionary)?;
        ids.iter().map(|id| entries.get(id).cloned()).collect()
    }

    async fn from_cache(&self, dictionary: &str, ids: &[String]) -> Option<Vec<EnumEntry>> {
        let values = match self.cache.hash_get(&enum_key(dictionary), ids).await {
            Ok(values) => values,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    dictionary,
                    error = %err,
                    "Enum cache tier unavailable"
                );
                return None;
            }
        };
        values
            .into_iter()
            .map(|raw| raw.and_then(|raw| serde_json::from_str::<EnumEntry>(&raw).ok()))
            .collect()
    }

    async fn from_search(&self, dictionary: &str, ids: &[String]) -> Option<Vec<EnumEntry>> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.search.enum_document(dictionary, id).await {
                Ok(Some(document)) => entries.push(EnumEntry::from_document(&document)?),
                Ok(None) => return None,
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        dictionary,
                        id = %id,
                        error = %err,
                        "Enum search tier unavailable"
                    );
                    return None;
                }
            }
        }
        Some(entries)
    }

    /// Bulk-load one dictionary from the search index into memory and cache.
    pub async fn load_dictionary(&self, dictionary: &str) -> Result<usize, SearchError> {
        let entries: Vec<EnumEntry> = self
            .search
            .enum_documents(dictionary)
            .await?
            .iter()
            .filter_map(EnumEntry::from_document)
            .collect();
        if entries.is_empty() {
            return Ok(0);
        }

        let fields: Vec<(String, String)> = entries
            .iter()
            .filter_map(|entry| {
                serde_json::to_string(entry)
                    .ok()
                    .map(|raw| (entry.id.clone(), raw))
            })
            .collect();
        if let Err(err) = self.cache.hash_set(&enum_key(dictionary), &fields).await {
            warn!(
                target = SOURCE,
                dictionary,
                error = %err,
                "Failed to store enum dictionary in cache"
            );
        }

        let loaded = entries.len();
        self.replace_memory(dictionary, entries);
        Ok(loaded)
    }

    /// Reload every known dictionary; failures are logged per dictionary.
    pub async fn load_all(&self) -> usize {
        let mut loaded = 0;
        for dictionary in self.dictionaries() {
            match self.load_dictionary(&dictionary).await {
                Ok(count) => loaded += count,
                Err(err) => warn!(
                    target = SOURCE,
                    dictionary = %dictionary,
                    error = %err,
                    "Enum dictionary reload failed"
                ),
            }
        }
        info!(target = SOURCE, loaded, "Enum dictionaries reloaded");
        loaded
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
