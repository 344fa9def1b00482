//! Search index adapters: Elasticsearch over HTTP and an in-process map.

use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::application::search::{SearchError, SearchIndex};
use crate::cache::{rw_read, rw_write};

const SOURCE: &str = "review_engagement::infra::search";
/// Upper bound on documents returned by a bulk dictionary load.
const FETCH_ALL_LIMIT: usize = 10_000;

/// Elasticsearch document API client.
pub struct ElasticSearchIndex {
    client: Client,
    base: String,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Value,
}

impl ElasticSearchIndex {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(concat!("review-engagement/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| SearchError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn doc_url(&self, index: &str, id: &str) -> String {
        format!("{}/{index}/_doc/{id}", self.base)
    }

    async fn fail(response: Response) -> SearchError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SearchError::Status { status, body }
    }
}

fn transport(err: reqwest::Error) -> SearchError {
    SearchError::Transport(err.to_string())
}

#[async_trait]
impl SearchIndex for ElasticSearchIndex {
    async fn put(&self, index: &str, id: &str, document: &Value) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.doc_url(index, id))
            .json(document)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(())
    }

    async fn remove(&self, index: &str, id: &str) -> Result<(), SearchError> {
        let response = self
            .client
            .delete(self.doc_url(index, id))
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::fail(response).await),
        }
    }

    async fn fetch(&self, index: &str, id: &str) -> Result<Option<Value>, SearchError> {
        let response = self
            .client
            .get(self.doc_url(index, id))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let body: GetResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Decode(err.to_string()))?;
        Ok(body.found.then_some(body.source).flatten())
    }

    async fn fetch_all(&self, index: &str) -> Result<Vec<Value>, SearchError> {
        let response = self
            .client
            .post(format!("{}/{index}/_search", self.base))
            .json(&serde_json::json!({
                "size": FETCH_ALL_LIMIT,
                "query": { "match_all": {} }
            }))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Decode(err.to_string()))?;
        Ok(body.hits.hits.into_iter().map(|hit| hit.source).collect())
    }
}

/// Index name → id → document.
#[derive(Default)]
pub struct MemorySearchIndex {
    indices: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemorySearchIndex {
    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        rw_read(&self.indices, SOURCE, "document")
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn len(&self, index: &str) -> usize {
        rw_read(&self.indices, SOURCE, "len")
            .get(index)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn put(&self, index: &str, id: &str, document: &Value) -> Result<(), SearchError> {
        rw_write(&self.indices, SOURCE, "put")
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn remove(&self, index: &str, id: &str) -> Result<(), SearchError> {
        if let Some(docs) = rw_write(&self.indices, SOURCE, "remove").get_mut(index) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn fetch(&self, index: &str, id: &str) -> Result<Option<Value>, SearchError> {
        Ok(self.document(index, id))
    }

    async fn fetch_all(&self, index: &str) -> Result<Vec<Value>, SearchError> {
        Ok(rw_read(&self.indices, SOURCE, "fetch_all")
            .get(index)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}
