//! Core data models used throughout the assistant.
//!
//! These types represent the corpus records, indexed documents, and
//! retrieval results that flow through the index and query pipeline.

use serde::{Deserialize, Serialize};

/// One question/answer pair from the corpus.
///
/// Constructed only by the corpus loader, which guarantees `question` and
/// `answer` are non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A corpus record paired with its position-derived document id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub doc_id: u64,
    pub record: CorpusRecord,
}

impl IndexedDocument {
    /// Assign ids by position: the i-th record gets `doc_id = i`.
    pub fn from_records(records: &[CorpusRecord]) -> Vec<IndexedDocument> {
        records
            .iter()
            .enumerate()
            .map(|(i, record)| IndexedDocument {
                doc_id: i as u64,
                record: record.clone(),
            })
            .collect()
    }
}

/// Per-field boost applied by the multi-field match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldWeights {
    #[serde(default = "default_question_weight")]
    pub question: f64,
    #[serde(default = "default_unit_weight")]
    pub answer: f64,
    #[serde(default = "default_unit_weight")]
    pub topic: f64,
    #[serde(default = "default_unit_weight")]
    pub title: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            question: default_question_weight(),
            answer: 1.0,
            topic: 1.0,
            title: 1.0,
        }
    }
}

fn default_question_weight() -> f64 {
    3.0
}
fn default_unit_weight() -> f64 {
    1.0
}

/// A single ranked passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub doc_id: u64,
    pub answer: String,
    pub score: f64,
}

/// Topic/title of the best hit, attached as provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Aggregate retrieval diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub elapsed_ms: u64,
    pub total_hits: u64,
    /// `None` when nothing matched.
    pub top_score: Option<f64>,
}

/// Ranked hits plus diagnostics for one query. Produced fresh per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<Hit>,
    pub provenance: Provenance,
    pub diagnostics: Diagnostics,
}

impl RetrievalResult {
    /// The answer texts in rank order.
    pub fn answers(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.answer.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(q: &str, a: &str) -> CorpusRecord {
        CorpusRecord {
            question: q.to_string(),
            answer: a.to_string(),
            topic: None,
            title: None,
        }
    }

    #[test]
    fn doc_ids_follow_position() {
        let docs = IndexedDocument::from_records(&[record("a", "1"), record("b", "2")]);
        assert_eq!(docs[0].doc_id, 0);
        assert_eq!(docs[1].doc_id, 1);
        assert_eq!(docs[1].record.question, "b");
    }

    #[test]
    fn answers_keep_rank_order() {
        let result = RetrievalResult {
            hits: vec![
                Hit {
                    doc_id: 4,
                    answer: "first".into(),
                    score: 2.0,
                },
                Hit {
                    doc_id: 1,
                    answer: "second".into(),
                    score: 1.0,
                },
            ],
            provenance: Provenance::default(),
            diagnostics: Diagnostics {
                elapsed_ms: 1,
                total_hits: 2,
                top_score: Some(2.0),
            },
        };
        assert_eq!(result.answers(), vec!["first", "second"]);
    }
}
