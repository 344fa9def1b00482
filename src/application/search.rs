//! Search index contract and the indexer that keeps entities mirrored into it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::entities::{EntityKind, EntityRecord};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(String),
    #[error("search backend answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("search response could not be decoded: {0}")]
    Decode(String),
}

/// Document store keyed by `(index, id)`.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn put(&self, index: &str, id: &str, document: &Value) -> Result<(), SearchError>;

    async fn remove(&self, index: &str, id: &str) -> Result<(), SearchError>;

    async fn fetch(&self, index: &str, id: &str) -> Result<Option<Value>, SearchError>;

    async fn fetch_all(&self, index: &str) -> Result<Vec<Value>, SearchError>;
}

/// Names indices and swallows failures; indexing is best effort.
#[derive(Clone)]
pub struct SearchIndexer {
    backend: Arc<dyn SearchIndex>,
    prefix: String,
}

impl SearchIndexer {
    pub fn new(backend: Arc<dyn SearchIndex>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn entity_index(&self, kind: EntityKind) -> String {
        format!("{}_{}", self.prefix, kind.name().to_ascii_lowercase())
    }

    pub fn enum_index(&self, dictionary: &str) -> String {
        format!("{}_enum_{}", self.prefix, dictionary.to_ascii_lowercase())
    }

    pub async fn index_record(&self, kind: EntityKind, record: &EntityRecord) {
        let Some(id) = record.id() else {
            return;
        };
        let index = self.entity_index(kind);
        if let Err(err) = self.backend.put(&index, id, &record.to_value()).await {
            warn!(
                target = "review_engagement::search",
                index = %index,
                id,
                error = %err,
                "Failed to index record"
            );
        }
    }

    pub async fn remove_record(&self, kind: EntityKind, id: &str) {
        let index = self.entity_index(kind);
        if let Err(err) = self.backend.remove(&index, id).await {
            warn!(
                target = "review_engagement::search",
                index = %index,
                id,
                error = %err,
                "Failed to remove record from index"
            );
        }
    }

    pub async fn enum_document(&self, dictionary: &str, id: &str) -> Result<Option<Value>, SearchError> {
        self.backend.fetch(&self.enum_index(dictionary), id).await
    }

    pub async fn enum_documents(&self, dictionary: &str) -> Result<Vec<Value>, SearchError> {
        self.backend.fetch_all(&self.enum_index(dictionary)).await
    }
}
