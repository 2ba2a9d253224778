//! Qdrant REST client implementing [`VectorIndex`].
//!
//! One collection holds every knowledge item as a point with two named
//! vectors: `dense` (cosine) for the text embedding and `labels` (sparse)
//! for the label vector. The collection is created on first upsert.
//!
//! Hybrid queries use Qdrant's query API with a sparse prefetch:
//!
//! ```json
//! {
//!   "prefetch": { "query": {"indices": [..], "values": [..]}, "using": "labels", "limit": 15 },
//!   "query": [0.1, ...], "using": "dense", "limit": 5, "with_payload": false
//! }
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use knowledge_hub_core::vector::{ScoredPoint, VectorIndex, VectorPoint, VectorQuery};

use crate::config::VectorStoreConfig;

const DENSE: &str = "dense";
const SPARSE: &str = "labels";

pub struct QdrantIndex {
    client: reqwest::Client,
    url: String,
    collection: String,
    api_key: Option<String>,
    dims: usize,
}

impl QdrantIndex {
    /// `dims` is the dense vector size used if the collection has to be
    /// created.
    pub fn new(config: &VectorStoreConfig, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
            dims,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}/collections/{}{}", self.url, self.collection, path));
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn create_collection(&self) -> Result<()> {
        if self.dims == 0 {
            bail!("cannot create Qdrant collection without embedding.dims");
        }
        let body = json!({
            "vectors": { "dense": { "size": self.dims, "distance": "Cosine" } },
            "sparse_vectors": { "labels": {} },
        });
        let resp = self
            .request(reqwest::Method::PUT, "")
            .json(&body)
            .send()
            .await
            .context("Qdrant create collection request failed")?;
        let status = resp.status();
        // 409: another writer created it first.
        if !status.is_success() && status != StatusCode::CONFLICT {
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant create collection error {}: {}", status, text);
        }
        tracing::info!(collection = %self.collection, dims = self.dims, "created Qdrant collection");
        Ok(())
    }

    async fn put_points(&self, body: &Value) -> Result<StatusCode> {
        let resp = self
            .request(reqwest::Method::PUT, "/points?wait=true")
            .json(body)
            .send()
            .await
            .context("Qdrant upsert request failed")?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(status);
        }
        let text = resp.text().await.unwrap_or_default();
        bail!("Qdrant upsert error {}: {}", status, text);
    }
}

fn repo_filter(repo_name: Option<&str>) -> Option<Value> {
    repo_name.map(|r| json!({ "must": [ { "key": "repo_name", "match": { "value": r } } ] }))
}

fn upsert_body(point: &VectorPoint) -> Value {
    let mut vector = json!({ "dense": point.dense });
    if !point.sparse.is_empty() {
        vector[SPARSE] = json!({
            "indices": point.sparse.indices,
            "values": point.sparse.values,
        });
    }
    json!({
        "points": [{
            "id": point.id,
            "vector": vector,
            "payload": point.payload,
        }]
    })
}

fn query_body(query: &VectorQuery) -> Value {
    let filter = repo_filter(query.repo_name.as_deref());
    let mut body = json!({
        "query": query.dense,
        "using": DENSE,
        "limit": query.limit,
        "with_payload": false,
    });
    if let Some(sparse) = query.sparse.as_ref().filter(|s| !s.is_empty()) {
        let mut prefetch = json!({
            "query": { "indices": sparse.indices, "values": sparse.values },
            "using": SPARSE,
            "limit": query.prefetch_limit,
        });
        if let Some(f) = &filter {
            prefetch["filter"] = f.clone();
        }
        body["prefetch"] = prefetch;
    }
    if let Some(f) = filter {
        body["filter"] = f;
    }
    body
}

fn parse_query_response(json: &Value) -> Result<Vec<ScoredPoint>> {
    let points = json
        .get("result")
        .and_then(|r| r.get("points").or(Some(r)))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing result points"))?;

    let mut out = Vec::with_capacity(points.len());
    for p in points {
        let id = match p.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => bail!("Invalid Qdrant response: point without id"),
        };
        let score = p.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
        out.push(ScoredPoint { id, score });
    }
    Ok(out)
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, point: VectorPoint) -> Result<()> {
        let body = upsert_body(&point);
        if self.put_points(&body).await? == StatusCode::NOT_FOUND {
            self.create_collection().await?;
            if self.put_points(&body).await? == StatusCode::NOT_FOUND {
                bail!("Qdrant collection {} not found after create", self.collection);
            }
        }
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<ScoredPoint>> {
        let resp = self
            .request(reqwest::Method::POST, "/points/query")
            .json(&query_body(query))
            .send()
            .await
            .context("Qdrant query request failed")?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            // Nothing has been imported yet.
            tracing::debug!(collection = %self.collection, "Qdrant collection missing, no results");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Qdrant query error {}: {}", status, text);
        }
        let json: Value = resp.json().await?;
        parse_query_response(&json)
    }
}
