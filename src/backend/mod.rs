//! Search backend abstraction.
//!
//! The [`SearchBackend`] trait defines the operations the index manager and
//! retriever need from a search engine, so the pipeline can run against the
//! embedded SQLite FTS5 store or an external Elasticsearch cluster.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`index_exists`](SearchBackend::index_exists) | Whether a completed index is present |
//! | [`replace_index`](SearchBackend::replace_index) | Delete-if-exists, create, bulk-load |
//! | [`delete_index`](SearchBackend::delete_index) | Drop an index (absence is not an error) |
//! | [`search`](SearchBackend::search) | Ranked multi-field match |

pub mod elastic;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{FieldWeights, IndexedDocument};
use crate::progress::RebuildProgressReporter;

/// A ranked multi-field query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// The raw question text.
    pub query: String,
    /// Normalized search terms extracted from `query` (see [`query_terms`]).
    pub terms: Vec<String>,
    pub weights: FieldWeights,
    /// Maximum number of hits to return.
    pub size: usize,
}

/// One document matched by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendHit {
    pub doc_id: u64,
    pub score: f64,
    pub answer: String,
    pub topic: Option<String>,
    pub title: Option<String>,
}

/// Hits in descending score order plus engine-side statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<BackendHit>,
    /// Total documents matching the query, not just the returned page.
    pub total_hits: u64,
    /// Engine-reported execution time, when the engine reports one.
    pub took_ms: Option<u64>,
}

/// Abstract search engine used by the index manager and retriever.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short backend identifier used in logs and errors (e.g. `"sqlite"`).
    fn name(&self) -> &str;

    /// Whether a completed index with this name exists.
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Replace the index with exactly `docs`: delete if present, create the
    /// schema, and load every document. Implementations must not leave a
    /// half-populated index behind when returning an error.
    async fn replace_index(
        &self,
        index: &str,
        docs: &[IndexedDocument],
        progress: &dyn RebuildProgressReporter,
    ) -> Result<()>;

    /// Drop the index. Absence of the index is not an error.
    async fn delete_index(&self, index: &str) -> Result<()>;

    /// Run a ranked query. Hits are ordered by descending score, with equal
    /// scores ordered by ascending `doc_id`.
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse>;
}

/// Split a question into lowercase alphanumeric search terms, deduplicated
/// in first-occurrence order.
///
/// Mirrors the tokenization of both engines (FTS5 `unicode61` and the
/// Elasticsearch standard analyzer) closely enough that a term produced here
/// is never a syntax error for either.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Sort hits by descending score, then ascending `doc_id`.
pub fn sort_hits(hits: &mut [BackendHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.doc_id.cmp(&b.doc_id))
    });
}

/// Create the backend selected by `config.index.backend`.
pub async fn create_backend(config: &Config) -> Result<Arc<dyn SearchBackend>> {
    match config.index.backend.as_str() {
        "sqlite" => {
            let pool = crate::db::connect(config).await?;
            Ok(Arc::new(sqlite::SqliteBackend::new(pool)))
        }
        "elasticsearch" => Ok(Arc::new(elastic::ElasticBackend::new(&config.index)?)),
        other => anyhow::bail!("Unknown index backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc_id: u64, score: f64) -> BackendHit {
        BackendHit {
            doc_id,
            score,
            answer: String::new(),
            topic: None,
            title: None,
        }
    }

    #[test]
    fn terms_strip_punctuation_and_case() {
        assert_eq!(
            query_terms("What is Over-fitting?"),
            vec!["what", "is", "over", "fitting"]
        );
    }

    #[test]
    fn terms_dedupe() {
        assert_eq!(query_terms("bias BIAS bias"), vec!["bias"]);
    }

    #[test]
    fn terms_of_punctuation_only_are_empty() {
        assert!(query_terms("??? -- !!").is_empty());
        assert!(query_terms("").is_empty());
    }

    #[test]
    fn fts_operators_become_plain_terms() {
        // `AND`, `NEAR(` and quotes are FTS5 syntax; they must reach the
        // engine only as quoted terms.
        assert_eq!(query_terms("\"a\" NEAR(b)"), vec!["a", "near", "b"]);
    }

    #[test]
    fn sort_breaks_ties_by_doc_id() {
        let mut hits = vec![hit(5, 1.0), hit(2, 3.0), hit(1, 1.0), hit(3, 1.0)];
        sort_hits(&mut hits);
        let order: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(order, vec![2, 1, 3, 5]);
    }
}
