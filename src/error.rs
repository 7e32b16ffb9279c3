//! Error taxonomy for the question answering pipeline.
//!
//! Every pipeline stage fails with one [`RagError`] variant. Surfaces (CLI,
//! HTTP server) match on the variant or on its stable [`RagError::code`] tag
//! to render an explicit error instead of a partial answer.

use thiserror::Error;

/// Errors produced by the retrieval and generation pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// The corpus source could not be read or parsed.
    #[error("corpus unavailable ({path}): {message}")]
    DataUnavailable {
        /// Path of the corpus file.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// Creating the schema or writing documents failed during a rebuild.
    #[error("index build failed for '{index}': {message}")]
    IndexBuildFailure {
        /// The index being rebuilt.
        index: String,
        /// A description of the failure.
        message: String,
    },

    /// A query was issued against an index that is missing, being rebuilt,
    /// or whose last rebuild failed.
    #[error("index '{index}' is not ready: {reason}")]
    IndexNotReady {
        /// The index that was queried.
        index: String,
        /// Why the index cannot serve queries.
        reason: String,
    },

    /// The question is empty or has no searchable terms.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A numeric argument violated its constraint (e.g. `top_k == 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The search backend failed while serving a query.
    #[error("search backend error ({backend}): {message}")]
    SearchFailure {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The generation runtime failed. Not retried.
    #[error("generation failed ({provider}): {message}")]
    GenerationFailure {
        /// The generation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },
}

impl RagError {
    /// Machine-readable tag, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::DataUnavailable { .. } => "data_unavailable",
            RagError::IndexBuildFailure { .. } => "index_build_failure",
            RagError::IndexNotReady { .. } => "index_not_ready",
            RagError::InvalidQuery(_) => "invalid_query",
            RagError::InvalidArgument(_) => "invalid_argument",
            RagError::SearchFailure { .. } => "search_failure",
            RagError::GenerationFailure { .. } => "generation_failure",
        }
    }

    /// Whether the caller can recover without operator action
    /// (by fixing the input or rebuilding the index).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RagError::IndexNotReady { .. }
                | RagError::InvalidQuery(_)
                | RagError::InvalidArgument(_)
        )
    }

    pub(crate) fn build_failure(index: &str, err: impl std::fmt::Display) -> Self {
        RagError::IndexBuildFailure {
            index: index.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn not_ready(index: &str, reason: impl Into<String>) -> Self {
        RagError::IndexNotReady {
            index: index.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;
