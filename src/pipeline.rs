//! Question answering pipeline.
//!
//! The single entry point the CLI and HTTP server call. One [`Pipeline`] is
//! built at startup and shared across requests:
//!
//! ```text
//! answer(question, top_k, rebuild_index)
//!   ├─ validate question and top_k
//!   ├─ rebuild_index? ── corpus::load ─▶ IndexManager::rebuild
//!   │        else     ── IndexManager::ensure_ready
//!   ├─ retrieve::retrieve     (ranked passages + diagnostics)
//!   ├─ prompt::assemble       (fixed template)
//!   └─ Generator::generate    (bounded input, capped output)
//! ```
//!
//! Stages run strictly in sequence; the first failure aborts the call and is
//! returned as-is. There is no partial answer.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::backend::{create_backend, SearchBackend};
use crate::config::Config;
use crate::error::Result;
use crate::generate::{create_generator, Generator};
use crate::index::{IndexManager, IndexState, IndexSummary};
use crate::models::{Diagnostics, Provenance, RetrievalResult};
use crate::progress::{NoProgress, RebuildProgressReporter};
use crate::{corpus, prompt, retrieve};

/// Everything a pipeline call needs, constructed once.
struct PipelineContext {
    config: Config,
    index: IndexManager,
    generator: Arc<dyn Generator>,
}

/// Result of one [`Pipeline::answer`] call.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    /// Fresh per call; the key under which surfaces store the conversation.
    pub conversation_id: Uuid,
    pub answer: String,
    pub diagnostics: Diagnostics,
    pub provenance: Provenance,
    pub prompt_truncated: bool,
}

pub struct Pipeline {
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(config: Config, backend: Arc<dyn SearchBackend>, generator: Arc<dyn Generator>) -> Self {
        Self {
            ctx: PipelineContext {
                config,
                index: IndexManager::new(backend),
                generator,
            },
        }
    }

    /// Wire the backend and generator named in `config`.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let backend = create_backend(&config).await?;
        let generator = create_generator(&config.generation)?;
        Ok(Self::new(config, backend, generator))
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    fn index_name(&self) -> &str {
        &self.ctx.config.index.name
    }

    pub async fn index_state(&self) -> Result<IndexState> {
        self.ctx.index.state(self.index_name()).await
    }

    /// Reload the corpus and rebuild the configured index.
    pub async fn rebuild_index(&self) -> Result<IndexSummary> {
        self.rebuild_index_with_progress(&NoProgress).await
    }

    pub async fn rebuild_index_with_progress(
        &self,
        progress: &dyn RebuildProgressReporter,
    ) -> Result<IndexSummary> {
        let records = corpus::load(&self.ctx.config.corpus.path)?;
        self.ctx
            .index
            .rebuild(self.index_name(), &records, progress)
            .await
    }

    /// Retrieval only, without generation.
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<RetrievalResult> {
        retrieve::retrieve(
            &self.ctx.index,
            self.index_name(),
            question,
            top_k,
            &self.ctx.config.retrieval,
        )
        .await
    }

    /// Answer `question` from the `top_k` best passages.
    ///
    /// With `rebuild_index` set, the index is rebuilt from the corpus first;
    /// otherwise it must already be built.
    ///
    /// # Errors
    ///
    /// The error of the first failing stage: `InvalidQuery` and
    /// `InvalidArgument` before any work is done, then
    /// `DataUnavailable`/`IndexBuildFailure` (rebuild), `IndexNotReady`,
    /// `SearchFailure`, and `GenerationFailure`.
    #[instrument(skip(self, question), fields(index = self.index_name()))]
    pub async fn answer(
        &self,
        question: &str,
        top_k: usize,
        rebuild_index: bool,
    ) -> Result<AnswerResponse> {
        retrieve::validate_question(question)?;
        retrieve::validate_top_k(top_k, self.ctx.config.retrieval.max_top_k)?;

        let conversation_id = Uuid::new_v4();
        let started = Instant::now();

        if rebuild_index {
            let summary = self.rebuild_index().await?;
            info!(
                doc_count = summary.doc_count,
                elapsed_ms = summary.elapsed_ms,
                "stage rebuild"
            );
        } else {
            self.ctx.index.ensure_ready(self.index_name()).await?;
        }

        let stage = Instant::now();
        let retrieved = self.retrieve(question, top_k).await?;
        info!(
            hits = retrieved.hits.len(),
            elapsed_ms = stage.elapsed().as_millis() as u64,
            "stage retrieve"
        );

        let prompt = prompt::assemble(question, &retrieved.answers());

        let stage = Instant::now();
        let params = self.ctx.config.generation.params();
        let generation = self.ctx.generator.generate(&prompt, &params).await?;
        info!(
            provider = self.ctx.generator.provider(),
            prompt_truncated = generation.prompt_truncated,
            elapsed_ms = stage.elapsed().as_millis() as u64,
            "stage generate"
        );

        info!(
            %conversation_id,
            total_ms = started.elapsed().as_millis() as u64,
            "answered"
        );

        Ok(AnswerResponse {
            conversation_id,
            answer: generation.text,
            diagnostics: retrieved.diagnostics,
            provenance: retrieved.provenance,
            prompt_truncated: generation.prompt_truncated,
        })
    }
}
