//! Corpus loader.
//!
//! Reads a CSV file of question/answer pairs into an ordered sequence of
//! [`CorpusRecord`]s. The header row must contain `question` and `answer`
//! columns (matched case-insensitively); `topic` and `title` are optional and
//! any other columns are ignored.
//!
//! Rows whose `question` or `answer` is missing or blank are dropped before
//! the sequence is returned, so the index never sees partial records.

use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{RagError, Result};
use crate::models::CorpusRecord;

/// Column positions resolved from the header row.
struct Columns {
    question: usize,
    answer: usize,
    topic: Option<usize>,
    title: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> std::result::Result<Self, String> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
        };
        let question = find("question").ok_or("missing required column 'question'")?;
        let answer = find("answer").ok_or("missing required column 'answer'")?;
        Ok(Self {
            question,
            answer,
            topic: find("topic"),
            title: find("title"),
        })
    }
}

/// Load every complete record from the CSV file at `path`.
pub fn load(path: &Path) -> Result<Vec<CorpusRecord>> {
    let label = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| RagError::DataUnavailable {
        path: label.clone(),
        message: e.to_string(),
    })?;
    let records = load_from_reader(file, &label)?;
    info!(path = %label, records = records.len(), "corpus loaded");
    Ok(records)
}

/// Load records from any CSV byte stream. `label` names the source in errors.
pub fn load_from_reader<R: Read>(reader: R, label: &str) -> Result<Vec<CorpusRecord>> {
    let unavailable = |message: String| RagError::DataUnavailable {
        path: label.to_string(),
        message,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers().map_err(|e| unavailable(e.to_string()))?.clone();
    if headers.is_empty() {
        return Err(unavailable("empty file: no header row".to_string()));
    }
    let columns = Columns::resolve(&headers).map_err(|m| unavailable(m.to_string()))?;

    let mut records = Vec::new();
    let mut dropped = 0usize;

    for (row_idx, row) in rdr.records().enumerate() {
        let row = row.map_err(|e| unavailable(format!("row {}: {}", row_idx + 1, e)))?;

        let question = cell(&row, Some(columns.question));
        let answer = cell(&row, Some(columns.answer));
        match (question, answer) {
            (Some(question), Some(answer)) => records.push(CorpusRecord {
                question,
                answer,
                topic: cell(&row, columns.topic),
                title: cell(&row, columns.title),
            }),
            _ => {
                dropped += 1;
                debug!(row = row_idx + 1, "dropping incomplete corpus row");
            }
        }
    }

    if dropped > 0 {
        info!(source = label, dropped, "dropped incomplete corpus rows");
    }

    Ok(records)
}

/// A trimmed, non-blank cell value.
fn cell(row: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    let value = row.get(idx?)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
