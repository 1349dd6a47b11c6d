//! Qdrant-backed [`VectorStore`] over the REST API.
//!
//! Both modalities use the universal query endpoint
//! `POST {url}/collections/{collection}/points/query`, selecting the named
//! vector with `using`: the dense query is a plain float array, the sparse
//! query is `{"indices": [...], "values": [...]}` built from the hashed term
//! indices of the [`SparseQuery`].
//!
//! Payload layout (written by ingestion): `text` (or `content`), `url`,
//! `title`, `source` (the configured CMS marker, e.g. `"Drupal"`, for web
//! pages), `course_id`, `module_id`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use campus_assistant_core::error::ExternalError;
use campus_assistant_core::models::{Chunk, ChunkMetadata, SourceType};
use campus_assistant_core::sparse::SparseQuery;
use campus_assistant_core::store::{rank_hits, SearchFilter, StoreHit, VectorStore};

use crate::config::StoreConfig;
use crate::http::{build_client, check_status, read_json, transport_error, Limiter};

const SERVICE: &str = "qdrant";

pub struct QdrantStore {
    url: String,
    collection: String,
    cms_source: String,
    dense_vector: String,
    sparse_vector: String,
    api_key: Option<String>,
    client: reqwest::Client,
    limiter: Limiter,
}

impl QdrantStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .context("store.url required for qdrant backend")?;
        let collection = config
            .collection
            .clone()
            .context("store.collection required for qdrant backend")?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            collection,
            cms_source: config.cms_source.clone(),
            dense_vector: config.dense_vector.clone(),
            sparse_vector: config.sparse_vector.clone(),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            client: build_client(config.timeout_secs)?,
            limiter: Limiter::new(SERVICE, config.max_concurrency),
        })
    }

    /// Translates a [`SearchFilter`] into a Qdrant `must` filter.
    fn filter_json(&self, filter: &SearchFilter) -> Option<Value> {
        let mut must = Vec::new();
        if filter.source_type == Some(SourceType::Cms) {
            must.push(json!({"key": "source", "match": {"text": self.cms_source}}));
        }
        if let Some(course_id) = filter.course_id {
            must.push(json!({"key": "course_id", "match": {"value": course_id}}));
        }
        if let Some(module_id) = filter.module_id {
            must.push(json!({"key": "module_id", "match": {"value": module_id}}));
        }
        (!must.is_empty()).then(|| json!({ "must": must }))
    }

    async fn query_points(&self, mut body: Value, filter: &SearchFilter) -> Result<Vec<StoreHit>, ExternalError> {
        let _permit = self.limiter.acquire().await?;

        if let Some(f) = self.filter_json(filter) {
            body["filter"] = f;
        }
        body["with_payload"] = json!(true);

        let mut req = self
            .client
            .post(format!(
                "{}/collections/{}/points/query",
                self.url, self.collection
            ))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }

        let response = req.send().await.map_err(|e| transport_error(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        let json = read_json(SERVICE, response).await?;
        parse_points(&json, &self.cms_source)
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn dense_search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        let body = json!({
            "query": vector,
            "using": self.dense_vector,
            "limit": k,
        });
        Ok(rank_hits(self.query_points(body, filter).await?, k))
    }

    async fn sparse_search(
        &self,
        query: &SparseQuery,
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let (indices, values) = query.indexed();
        let body = json!({
            "query": {"indices": indices, "values": values},
            "using": self.sparse_vector,
            "limit": k,
        });
        Ok(rank_hits(self.query_points(body, filter).await?, k))
    }
}

/// Reads `result.points[]` into hits.
fn parse_points(json: &Value, cms_source: &str) -> Result<Vec<StoreHit>, ExternalError> {
    let points = json
        .get("result")
        .and_then(|r| r.get("points").or(Some(r)))
        .and_then(|p| p.as_array())
        .ok_or_else(|| ExternalError::invalid(SERVICE, "missing result.points"))?;

    points
        .iter()
        .map(|p| {
            let id = match p.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(ExternalError::invalid(SERVICE, "point without id")),
            };
            let score = p.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            let payload = p.get("payload").cloned().unwrap_or(Value::Null);
            Ok(StoreHit {
                chunk: payload_to_chunk(id, &payload, cms_source),
                score,
            })
        })
        .collect()
}

fn payload_to_chunk(id: String, payload: &Value, cms_source: &str) -> Chunk {
    let str_field = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let text = payload
        .get("text")
        .or_else(|| payload.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let source_type = if str_field("source").contains(cms_source) {
        SourceType::Cms
    } else {
        SourceType::Course
    };

    Chunk {
        id,
        text,
        metadata: ChunkMetadata {
            url: str_field("url"),
            title: str_field("title"),
            source_type,
            course_id: payload.get("course_id").and_then(|v| v.as_i64()),
            module_id: payload.get("module_id").and_then(|v| v.as_i64()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_assistant_core::models::Scope;

    fn store() -> QdrantStore {
        QdrantStore {
            url: "http://localhost:6333".to_string(),
            collection: "web".to_string(),
            cms_source: "Drupal".to_string(),
            dense_vector: "dense".to_string(),
            sparse_vector: "sparse".to_string(),
            api_key: None,
            client: reqwest::Client::new(),
            limiter: Limiter::new(SERVICE, 1),
        }
    }

    #[test]
    fn test_general_scope_filters_on_cms_source() {
        let f = store()
            .filter_json(&SearchFilter::from_scope(&Scope::general()))
            .unwrap();
        assert_eq!(f["must"][0]["key"], "source");
        assert_eq!(f["must"][0]["match"]["text"], "Drupal");
    }

    #[test]
    fn test_module_scope_filter() {
        let f = store()
            .filter_json(&SearchFilter::from_scope(&Scope::module(79, 3)))
            .unwrap();
        let must = f["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["match"]["value"], 79);
        assert_eq!(must[1]["key"], "module_id");
    }

    #[test]
    fn test_parse_points() {
        let json = json!({"result": {"points": [
            {"id": 17, "score": 0.83, "payload": {
                "text": "Kursinhalt", "url": "https://moodle/x", "title": "Modul 1",
                "source": "Moodle", "course_id": 79, "module_id": 3}},
            {"id": "8c5e", "score": 0.41, "payload": {
                "content": "FAQ", "url": "https://ki-campus.org/faq", "source": "Drupal"}}
        ]}});
        let hits = parse_points(&json, "Drupal").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "17");
        assert_eq!(hits[0].chunk.metadata.source_type, SourceType::Course);
        assert_eq!(hits[0].chunk.metadata.course_id, Some(79));
        assert_eq!(hits[1].chunk.text, "FAQ");
        assert_eq!(hits[1].chunk.metadata.source_type, SourceType::Cms);
        assert_eq!(hits[1].chunk.metadata.title, "");
    }

    #[test]
    fn test_parse_points_rejects_garbage() {
        assert!(parse_points(&json!({"status": "ok"}), "Drupal").is_err());
    }
}
