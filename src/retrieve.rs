//! Ranked multi-field retrieval.
//!
//! Validates the question and `top_k`, checks the index is ready, runs one
//! weighted query against the [`SearchBackend`](crate::backend::SearchBackend)
//! and packages the hits with provenance and diagnostics.

use std::time::Instant;
use tracing::{debug, instrument};

use crate::backend::{query_terms, sort_hits, SearchRequest};
use crate::config::RetrievalConfig;
use crate::error::{RagError, Result};
use crate::index::IndexManager;
use crate::models::{Diagnostics, Hit, Provenance, RetrievalResult};

/// Reject an empty or whitespace-only question, or one with no searchable
/// terms.
pub fn validate_question(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidQuery(
            "question must not be empty".to_string(),
        ));
    }
    if query_terms(query).is_empty() {
        return Err(RagError::InvalidQuery(
            "question has no searchable terms".to_string(),
        ));
    }
    Ok(())
}

/// Reject `top_k == 0` and values above `max_top_k`.
pub fn validate_top_k(top_k: usize, max_top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(RagError::InvalidArgument("top_k must be >= 1".to_string()));
    }
    if top_k > max_top_k {
        return Err(RagError::InvalidArgument(format!(
            "top_k must be <= {}",
            max_top_k
        )));
    }
    Ok(())
}

/// Return the `top_k` best passages from `index` for `query`.
///
/// # Errors
///
/// - [`RagError::InvalidQuery`] for a blank question or one with no
///   searchable terms; checked before the backend is touched.
/// - [`RagError::InvalidArgument`] when `top_k` is 0 or above
///   `settings.max_top_k`.
/// - [`RagError::IndexNotReady`] unless the index is `Indexed`.
/// - [`RagError::SearchFailure`] when the backend query fails.
#[instrument(skip(manager, settings), fields(backend = manager.backend().name()))]
pub async fn retrieve(
    manager: &IndexManager,
    index: &str,
    query: &str,
    top_k: usize,
    settings: &RetrievalConfig,
) -> Result<RetrievalResult> {
    validate_question(query)?;
    validate_top_k(top_k, settings.max_top_k)?;

    let terms = query_terms(query);
    manager.ensure_ready(index).await?;

    let started = Instant::now();
    let backend = manager.backend();
    let request = SearchRequest {
        query: query.to_string(),
        terms,
        weights: settings.weights,
        size: top_k,
    };
    let mut response =
        backend
            .search(index, &request)
            .await
            .map_err(|e| RagError::SearchFailure {
                backend: backend.name().to_string(),
                message: format!("{:#}", e),
            })?;

    sort_hits(&mut response.hits);
    response.hits.truncate(top_k);

    let elapsed_ms = response
        .took_ms
        .unwrap_or_else(|| started.elapsed().as_millis() as u64);

    let provenance = response
        .hits
        .first()
        .map(|h| Provenance {
            topic: h.topic.clone(),
            title: h.title.clone(),
        })
        .unwrap_or_default();

    let hits: Vec<Hit> = response
        .hits
        .into_iter()
        .map(|h| Hit {
            doc_id: h.doc_id,
            answer: h.answer,
            score: h.score,
        })
        .collect();

    let diagnostics = Diagnostics {
        elapsed_ms,
        total_hits: response.total_hits,
        top_score: hits.first().map(|h| h.score),
    };

    debug!(
        hits = hits.len(),
        total_hits = diagnostics.total_hits,
        elapsed_ms,
        "retrieved"
    );

    Ok(RetrievalResult {
        hits,
        provenance,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendHit, SearchBackend, SearchResponse};
    use crate::models::{CorpusRecord, IndexedDocument};
    use crate::progress::{NoProgress, RebuildProgressReporter};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns a fixed page of hits, out of order, and counts searches.
    #[derive(Default)]
    struct CannedBackend {
        searches: AtomicUsize,
        broken: bool,
    }

    #[async_trait]
    impl SearchBackend for CannedBackend {
        fn name(&self) -> &str {
            "canned"
        }
        async fn index_exists(&self, _index: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn replace_index(
            &self,
            _index: &str,
            _docs: &[IndexedDocument],
            _progress: &dyn RebuildProgressReporter,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_index(&self, _index: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _index: &str,
            request: &SearchRequest,
        ) -> anyhow::Result<SearchResponse> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                anyhow::bail!("connection refused");
            }
            let hit = |doc_id, score, topic: Option<&str>| BackendHit {
                doc_id,
                score,
                answer: format!("answer {}", doc_id),
                topic: topic.map(String::from),
                title: None,
            };
            let mut hits = vec![
                hit(7, 1.0, Some("stats")),
                hit(2, 4.0, Some("ml")),
                hit(3, 1.0, None),
            ];
            hits.truncate(request.size);
            Ok(SearchResponse {
                hits,
                total_hits: 3,
                took_ms: Some(5),
            })
        }
    }

    async fn ready_manager(backend: CannedBackend) -> (Arc<CannedBackend>, IndexManager) {
        let backend = Arc::new(backend);
        let manager = IndexManager::new(backend.clone());
        let records = vec![CorpusRecord {
            question: "q".into(),
            answer: "a".into(),
            topic: None,
            title: None,
        }];
        manager.rebuild("qa", &records, &NoProgress).await.unwrap();
        (backend, manager)
    }

    #[tokio::test]
    async fn orders_hits_and_takes_provenance_from_best() {
        let (_, manager) = ready_manager(CannedBackend::default()).await;
        let result = retrieve(&manager, "qa", "what", 3, &RetrievalConfig::default())
            .await
            .unwrap();

        let ids: Vec<u64> = result.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![2, 3, 7]);
        assert_eq!(result.provenance.topic.as_deref(), Some("ml"));
        assert_eq!(result.diagnostics.top_score, Some(4.0));
        assert_eq!(result.diagnostics.total_hits, 3);
        assert_eq!(result.diagnostics.elapsed_ms, 5);
    }

    #[tokio::test]
    async fn blank_query_never_reaches_backend() {
        let (backend, manager) = ready_manager(CannedBackend::default()).await;
        for q in ["", "   ", "?!?"] {
            let err = retrieve(&manager, "qa", q, 3, &RetrievalConfig::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_query", "query {:?}", q);
        }
        assert_eq!(backend.searches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn termless_question_is_invalid() {
        let err = validate_question("??? ...").unwrap_err();
        assert!(err.to_string().contains("no searchable terms"));
        validate_question("p-value?").unwrap();
    }

    #[tokio::test]
    async fn top_k_bounds() {
        let (_, manager) = ready_manager(CannedBackend::default()).await;
        let settings = RetrievalConfig::default();
        let err = retrieve(&manager, "qa", "what", 0, &settings)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        let err = retrieve(&manager, "qa", "what", settings.max_top_k + 1, &settings)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[tokio::test]
    async fn unbuilt_index_is_not_ready() {
        let manager = IndexManager::new(Arc::new(CannedBackend::default()));
        let err = retrieve(&manager, "qa", "what", 3, &RetrievalConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "index_not_ready");
    }

    #[tokio::test]
    async fn backend_error_is_search_failure() {
        let (_, manager) = ready_manager(CannedBackend {
            broken: true,
            ..Default::default()
        })
        .await;
        let err = retrieve(&manager, "qa", "what", 3, &RetrievalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::SearchFailure { .. }));
        assert!(err.to_string().contains("connection refused"));
    }
}
