//! Elasticsearch [`SearchBackend`] over the REST API.
//!
//! Indexes are created with an explicit mapping (`doc_id` as an integer,
//! the four corpus fields as `text`) and filled through `_bulk` with
//! `refresh=true`, so a finished rebuild is immediately searchable.
//!
//! Elasticsearch has no transactional rebuild. If any step fails, the partial
//! index is deleted before the error is returned, so it is never mistaken for
//! a completed one.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use super::{sort_hits, BackendHit, SearchBackend, SearchRequest, SearchResponse};
use crate::config::IndexConfig;
use crate::models::{FieldWeights, IndexedDocument};
use crate::progress::{RebuildProgressEvent, RebuildProgressReporter};

/// Elasticsearch implementation of the [`SearchBackend`] trait.
pub struct ElasticBackend {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
}

impl ElasticBackend {
    /// Create a backend from the `[index]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not set or the HTTP client cannot be built.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("index.url required for elasticsearch backend"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            batch_size: config.bulk_batch_size.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn create(&self, index: &str) -> Result<()> {
        let resp = self
            .client
            .put(self.url(index))
            .json(&index_mapping())
            .send()
            .await?;
        ensure_success(resp, "create index").await?;
        Ok(())
    }

    async fn bulk_load(
        &self,
        index: &str,
        docs: &[IndexedDocument],
        progress: &dyn RebuildProgressReporter,
    ) -> Result<()> {
        let total = docs.len() as u64;
        let mut written = 0u64;

        for batch in docs.chunks(self.batch_size) {
            let resp = self
                .client
                .post(self.url(&format!("{}/_bulk?refresh=true", index)))
                .header("Content-Type", "application/x-ndjson")
                .body(bulk_body(batch)?)
                .send()
                .await?;
            let json = ensure_success(resp, "bulk load").await?;
            check_bulk_response(&json)?;

            written += batch.len() as u64;
            progress.report(RebuildProgressEvent::Loading {
                index: index.to_string(),
                n: written,
                total,
            });
        }

        // `refresh=true` is per batch; an empty corpus still needs one refresh.
        if docs.is_empty() {
            let resp = self
                .client
                .post(self.url(&format!("{}/_refresh", index)))
                .send()
                .await?;
            ensure_success(resp, "refresh").await?;
        }

        Ok(())
    }
}

/// The fixed mapping for every corpus index.
fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "doc_id": { "type": "long" },
                "question": { "type": "text" },
                "answer": { "type": "text" },
                "topic": { "type": "text" },
                "title": { "type": "text" }
            }
        }
    })
}

/// NDJSON body for `_bulk`: an action line and a source line per document.
fn bulk_body(docs: &[IndexedDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({ "index": { "_id": doc.doc_id.to_string() } });
        let mut source = json!({
            "doc_id": doc.doc_id,
            "question": doc.record.question,
            "answer": doc.record.answer,
        });
        if let Some(topic) = &doc.record.topic {
            source["topic"] = json!(topic);
        }
        if let Some(title) = &doc.record.title {
            source["title"] = json!(title);
        }
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&source)?);
        body.push('\n');
    }
    Ok(body)
}

fn check_bulk_response(json: &Value) -> Result<()> {
    if json.get("errors").and_then(|e| e.as_bool()).unwrap_or(false) {
        let first = json
            .get("items")
            .and_then(|i| i.as_array())
            .and_then(|items| {
                items.iter().find_map(|item| {
                    item.get("index")
                        .and_then(|op| op.get("error"))
                        .map(|e| e.to_string())
                })
            })
            .unwrap_or_else(|| "unknown item error".to_string());
        bail!("bulk load reported errors: {}", first);
    }
    Ok(())
}

/// `multi_match` search body, boosting fields by their configured weights.
fn search_body(request: &SearchRequest) -> Value {
    json!({
        "size": request.size,
        "track_total_hits": true,
        "query": {
            "multi_match": {
                "query": request.query,
                "fields": boosted_fields(&request.weights),
                "type": "best_fields"
            }
        },
        "sort": [
            { "_score": { "order": "desc" } },
            { "doc_id": { "order": "asc" } }
        ]
    })
}

fn boosted_fields(w: &FieldWeights) -> Vec<String> {
    [
        ("question", w.question),
        ("answer", w.answer),
        ("topic", w.topic),
        ("title", w.title),
    ]
    .into_iter()
    .filter(|(_, weight)| *weight > 0.0)
    .map(|(field, weight)| format!("{}^{}", field, weight))
    .collect()
}

fn parse_search_response(json: &Value) -> Result<SearchResponse> {
    let hits_obj = json
        .get("hits")
        .ok_or_else(|| anyhow!("Invalid search response: missing hits"))?;

    let total_hits = hits_obj
        .get("total")
        .and_then(|t| t.get("value").or(Some(t)))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let raw = hits_obj
        .get("hits")
        .and_then(|h| h.as_array())
        .ok_or_else(|| anyhow!("Invalid search response: missing hits array"))?;

    let mut hits = Vec::with_capacity(raw.len());
    for hit in raw {
        let source = hit
            .get("_source")
            .ok_or_else(|| anyhow!("Invalid search response: hit without _source"))?;
        let doc_id = source
            .get("doc_id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("Invalid search response: hit without doc_id"))?;
        let answer = source
            .get("answer")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Invalid search response: hit without answer"))?;
        let text = |field: &str| {
            source
                .get(field)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        hits.push(BackendHit {
            doc_id,
            score: hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0),
            answer: answer.to_string(),
            topic: text("topic"),
            title: text("title"),
        });
    }
    sort_hits(&mut hits);

    Ok(SearchResponse {
        hits,
        total_hits,
        took_ms: json.get("took").and_then(|t| t.as_u64()),
    })
}

async fn ensure_success(resp: reqwest::Response, action: &str) -> Result<Value> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&body)
            .with_context(|| format!("Invalid JSON in {} response", action));
    }
    let body_text = resp.text().await.unwrap_or_default();
    bail!("Elasticsearch {} failed {}: {}", action, status, body_text);
}

#[async_trait]
impl SearchBackend for ElasticBackend {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let resp = self.client.head(self.url(index)).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => bail!("Elasticsearch index check failed: {}", other),
        }
    }

    async fn replace_index(
        &self,
        index: &str,
        docs: &[IndexedDocument],
        progress: &dyn RebuildProgressReporter,
    ) -> Result<()> {
        self.delete_index(index).await?;
        self.create(index).await?;
        progress.report(RebuildProgressEvent::Created {
            index: index.to_string(),
        });

        if let Err(e) = self.bulk_load(index, docs, progress).await {
            if let Err(cleanup) = self.delete_index(index).await {
                warn!(index, error = %cleanup, "failed to remove partial index");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let resp = self.client.delete(self.url(index)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(resp, "delete index").await?;
        Ok(())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let resp = self
            .client
            .post(self.url(&format!("{}/_search", index)))
            .json(&search_body(request))
            .send()
            .await?;
        let json = ensure_success(resp, "search").await?;
        parse_search_response(&json)
    }
}
