//! Index manager.
//!
//! Owns the lifecycle of every named index: validates names, serializes
//! rebuilds per name, tracks the [`IndexState`] readers consult before
//! querying, and fingerprints each load.
//!
//! ```text
//!            rebuild()                 replace_index() ok
//!   Empty ─────────────▶ Building ─────────────────────────▶ Indexed
//!     ▲                     │                                  │
//!     │ drop_index()        │ error / interrupted              │ rebuild()
//!     │                     ▼                                  ▼
//!     └──────────────── Failed ◀──────────────────────────  Building
//! ```
//!
//! Only `Indexed` serves queries; every other state yields
//! [`RagError::IndexNotReady`].

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{error, info, instrument};

use crate::backend::SearchBackend;
use crate::error::{RagError, Result};
use crate::models::{CorpusRecord, IndexedDocument};
use crate::progress::{RebuildProgressEvent, RebuildProgressReporter};

/// Lifecycle state of one named index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexState {
    /// Never built, or dropped.
    Empty,
    /// A rebuild is in flight; readers must not use the index.
    Building,
    /// Fully loaded. `doc_count` and `fingerprint` are `None` when the index
    /// was built by another process and discovered through the backend.
    Indexed {
        doc_count: Option<u64>,
        fingerprint: Option<String>,
    },
    /// The last rebuild did not complete. The index must be rebuilt before it
    /// is trusted again.
    Failed { message: String },
}

/// Outcome of a successful rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub index: String,
    pub backend: String,
    pub doc_count: u64,
    pub fingerprint: String,
    pub elapsed_ms: u64,
}

/// Index names become SQLite table names and URL path segments.
pub fn is_valid_index_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.len() <= 64
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// SHA-256 over the ordered documents. Equal inputs give equal fingerprints.
pub fn fingerprint(docs: &[IndexedDocument]) -> String {
    fn field(hasher: &mut Sha256, value: Option<&str>) {
        match value {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update((v.len() as u64).to_le_bytes());
                hasher.update(v.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }

    let mut hasher = Sha256::new();
    for doc in docs {
        hasher.update(doc.doc_id.to_le_bytes());
        field(&mut hasher, Some(&doc.record.question));
        field(&mut hasher, Some(&doc.record.answer));
        field(&mut hasher, doc.record.topic.as_deref());
        field(&mut hasher, doc.record.title.as_deref());
    }
    format!("{:x}", hasher.finalize())
}

/// Manages named indexes over a shared [`SearchBackend`].
pub struct IndexManager {
    backend: Arc<dyn SearchBackend>,
    states: RwLock<HashMap<String, IndexState>>,
    rebuild_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexManager {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            states: RwLock::new(HashMap::new()),
            rebuild_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Replace `index` with exactly `records`, assigning `doc_id` by position.
    ///
    /// At most one rebuild per index name runs at a time; a second caller
    /// waits for the first to finish. While the rebuild runs, readers see
    /// [`IndexState::Building`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexBuildFailure`] if the name is invalid or the
    /// backend fails to create or load the index. The state is then
    /// [`IndexState::Failed`].
    #[instrument(skip(self, records, progress), fields(records = records.len()))]
    pub async fn rebuild(
        &self,
        index: &str,
        records: &[CorpusRecord],
        progress: &dyn RebuildProgressReporter,
    ) -> Result<IndexSummary> {
        if !is_valid_index_name(index) {
            return Err(RagError::build_failure(
                index,
                "index name must be 1-64 chars of [a-z0-9_] starting with a letter",
            ));
        }

        let lock = self.rebuild_lock(index);
        let _held = lock.lock().await;

        let started = Instant::now();
        let mut guard = BuildGuard::new(self, index);

        let docs = IndexedDocument::from_records(records);
        let fingerprint = fingerprint(&docs);

        if let Err(e) = self.backend.replace_index(index, &docs, progress).await {
            let message = format!("{:#}", e);
            error!(index, backend = self.backend.name(), error = %message, "rebuild failed");
            guard.fail(&message);
            return Err(RagError::build_failure(index, message));
        }

        let doc_count = docs.len() as u64;
        guard.complete(IndexState::Indexed {
            doc_count: Some(doc_count),
            fingerprint: Some(fingerprint.clone()),
        });
        progress.report(RebuildProgressEvent::Ready {
            index: index.to_string(),
            total: doc_count,
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(index, doc_count, elapsed_ms, %fingerprint, "index rebuilt");

        Ok(IndexSummary {
            index: index.to_string(),
            backend: self.backend.name().to_string(),
            doc_count,
            fingerprint,
            elapsed_ms,
        })
    }

    /// Current state of `index`.
    ///
    /// Without an in-process record, the backend is asked whether a completed
    /// index exists, so an index built by an earlier run is usable.
    pub async fn state(&self, index: &str) -> Result<IndexState> {
        if let Some(state) = self.read_state(index) {
            return Ok(state);
        }
        if !is_valid_index_name(index) {
            return Ok(IndexState::Empty);
        }

        let exists = self
            .backend
            .index_exists(index)
            .await
            .map_err(|e| RagError::SearchFailure {
                backend: self.backend.name().to_string(),
                message: format!("{:#}", e),
            })?;

        if !exists {
            return Ok(IndexState::Empty);
        }

        let discovered = IndexState::Indexed {
            doc_count: None,
            fingerprint: None,
        };
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        // A rebuild may have started while the backend was being asked.
        let state = states.entry(index.to_string()).or_insert(discovered);
        Ok(state.clone())
    }

    /// Succeeds only when `index` is [`IndexState::Indexed`].
    pub async fn ensure_ready(&self, index: &str) -> Result<()> {
        match self.state(index).await? {
            IndexState::Indexed { .. } => Ok(()),
            IndexState::Empty => Err(RagError::not_ready(index, "index has not been built")),
            IndexState::Building => Err(RagError::not_ready(index, "rebuild in progress")),
            IndexState::Failed { message } => Err(RagError::not_ready(
                index,
                format!("last rebuild failed: {}", message),
            )),
        }
    }

    /// Drop `index` from the backend. Dropping a missing index succeeds.
    pub async fn drop_index(&self, index: &str) -> Result<()> {
        if !is_valid_index_name(index) {
            return Err(RagError::build_failure(index, "invalid index name"));
        }
        let lock = self.rebuild_lock(index);
        let _held = lock.lock().await;

        self.backend
            .delete_index(index)
            .await
            .map_err(|e| RagError::build_failure(index, format!("{:#}", e)))?;
        self.write_state(index, IndexState::Empty);
        info!(index, "index dropped");
        Ok(())
    }

    fn rebuild_lock(&self, index: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.rebuild_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(index.to_string()).or_default().clone()
    }

    fn read_state(&self, index: &str) -> Option<IndexState> {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states.get(index).cloned()
    }

    fn write_state(&self, index: &str, state: IndexState) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.insert(index.to_string(), state);
    }
}

/// Marks an index `Building` for its lifetime. If dropped before
/// [`BuildGuard::complete`] (an error, or the rebuild future being dropped),
/// the index is left `Failed` rather than `Building`.
struct BuildGuard<'a> {
    manager: &'a IndexManager,
    index: &'a str,
    finished: bool,
}

impl<'a> BuildGuard<'a> {
    fn new(manager: &'a IndexManager, index: &'a str) -> Self {
        manager.write_state(index, IndexState::Building);
        Self {
            manager,
            index,
            finished: false,
        }
    }

    fn complete(&mut self, state: IndexState) {
        self.manager.write_state(self.index, state);
        self.finished = true;
    }

    fn fail(&mut self, message: &str) {
        self.complete(IndexState::Failed {
            message: message.to_string(),
        });
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.manager.write_state(
                self.index,
                IndexState::Failed {
                    message: "rebuild interrupted".to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SearchRequest, SearchResponse};
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that records whether an index was loaded and can be told to fail.
    #[derive(Default)]
    struct FakeBackend {
        fail_load: AtomicBool,
        loaded: AtomicBool,
    }

    #[async_trait]
    impl SearchBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }
        async fn index_exists(&self, _index: &str) -> anyhow::Result<bool> {
            Ok(self.loaded.load(Ordering::SeqCst))
        }
        async fn replace_index(
            &self,
            _index: &str,
            _docs: &[IndexedDocument],
            _progress: &dyn RebuildProgressReporter,
        ) -> anyhow::Result<()> {
            if self.fail_load.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn delete_index(&self, _index: &str) -> anyhow::Result<()> {
            self.loaded.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn search(
            &self,
            _index: &str,
            _request: &SearchRequest,
        ) -> anyhow::Result<SearchResponse> {
            Ok(SearchResponse {
                hits: Vec::new(),
                total_hits: 0,
                took_ms: None,
            })
        }
    }

    fn records() -> Vec<CorpusRecord> {
        vec![
            CorpusRecord {
                question: "What is overfitting?".into(),
                answer: "Model fits noise in training data.".into(),
                topic: Some("ml".into()),
                title: None,
            },
            CorpusRecord {
                question: "Define bias-variance tradeoff".into(),
                answer: "Balance between underfitting and overfitting.".into(),
                topic: None,
                title: None,
            },
        ]
    }

    #[test]
    fn index_names() {
        assert!(is_valid_index_name("course_qa"));
        assert!(is_valid_index_name("q2"));
        assert!(!is_valid_index_name(""));
        assert!(!is_valid_index_name("2q"));
        assert!(!is_valid_index_name("Course"));
        assert!(!is_valid_index_name("a-b"));
        assert!(!is_valid_index_name(&"a".repeat(65)));
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let docs = IndexedDocument::from_records(&records());
        assert_eq!(fingerprint(&docs), fingerprint(&docs.clone()));

        let mut reversed = records();
        reversed.reverse();
        let other = IndexedDocument::from_records(&reversed);
        assert_ne!(fingerprint(&docs), fingerprint(&other));
    }

    #[test]
    fn fingerprint_distinguishes_missing_from_empty_topic() {
        let mut a = records();
        a[1].topic = Some(String::new());
        let b = records();
        assert_ne!(
            fingerprint(&IndexedDocument::from_records(&a)),
            fingerprint(&IndexedDocument::from_records(&b))
        );
    }

    #[tokio::test]
    async fn empty_until_rebuilt() {
        let manager = IndexManager::new(Arc::new(FakeBackend::default()));
        assert_eq!(manager.state("qa").await.unwrap(), IndexState::Empty);
        let err = manager.ensure_ready("qa").await.unwrap_err();
        assert_eq!(err.code(), "index_not_ready");

        let summary = manager.rebuild("qa", &records(), &NoProgress).await.unwrap();
        assert_eq!(summary.doc_count, 2);
        manager.ensure_ready("qa").await.unwrap();
    }

    #[tokio::test]
    async fn failed_rebuild_is_not_ready() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_load.store(true, Ordering::SeqCst);
        let manager = IndexManager::new(backend);

        let err = manager.rebuild("qa", &records(), &NoProgress).await.unwrap_err();
        assert_eq!(err.code(), "index_build_failure");
        assert!(err.to_string().contains("disk full"));

        match manager.state("qa").await.unwrap() {
            IndexState::Failed { message } => assert!(message.contains("disk full")),
            other => panic!("expected Failed, got {:?}", other),
        }
        let err = manager.ensure_ready("qa").await.unwrap_err();
        assert!(err.to_string().contains("last rebuild failed"));
    }

    #[tokio::test]
    async fn rebuild_twice_gives_same_fingerprint() {
        let manager = IndexManager::new(Arc::new(FakeBackend::default()));
        let first = manager.rebuild("qa", &records(), &NoProgress).await.unwrap();
        let second = manager.rebuild("qa", &records(), &NoProgress).await.unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[tokio::test]
    async fn invalid_name_is_build_failure() {
        let manager = IndexManager::new(Arc::new(FakeBackend::default()));
        let err = manager
            .rebuild("bad name", &records(), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexBuildFailure { .. }));
    }

    #[tokio::test]
    async fn discovers_index_built_elsewhere() {
        let backend = Arc::new(FakeBackend::default());
        backend.loaded.store(true, Ordering::SeqCst);
        let manager = IndexManager::new(backend);
        assert_eq!(
            manager.state("qa").await.unwrap(),
            IndexState::Indexed {
                doc_count: None,
                fingerprint: None
            }
        );
    }

    #[tokio::test]
    async fn drop_returns_to_empty() {
        let manager = IndexManager::new(Arc::new(FakeBackend::default()));
        manager.rebuild("qa", &records(), &NoProgress).await.unwrap();
        manager.drop_index("qa").await.unwrap();
        assert_eq!(manager.state("qa").await.unwrap(), IndexState::Empty);
        // Dropping again is not an error.
        manager.drop_index("qa").await.unwrap();
    }
}
