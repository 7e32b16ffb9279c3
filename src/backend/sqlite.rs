//! SQLite FTS5 [`SearchBackend`].
//!
//! Each index is an FTS5 virtual table `qa_idx_{name}` with the columns
//! `doc_id UNINDEXED, question, answer, topic, title`. A registry table,
//! `search_indexes`, records which indexes finished loading.
//!
//! A rebuild drops, recreates and fills the table inside one transaction, so
//! readers on other connections see either the previous index or the new one,
//! never a mix.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{BackendHit, SearchBackend, SearchRequest, SearchResponse};
use crate::models::IndexedDocument;
use crate::progress::{RebuildProgressEvent, RebuildProgressReporter, REPORT_EVERY};

/// SQLite implementation of the [`SearchBackend`] trait.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn registry_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='search_indexes'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

/// Table backing `index`. Names are restricted to `[a-z0-9_]` because they
/// are spliced into DDL.
fn table_name(index: &str) -> Result<String> {
    if !crate::index::is_valid_index_name(index) {
        bail!("invalid index name: '{}'", index);
    }
    Ok(format!("qa_idx_{}", index))
}

/// FTS5 MATCH expression: each term quoted, OR-ed together.
fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

const CREATE_REGISTRY: &str = r#"
    CREATE TABLE IF NOT EXISTS search_indexes (
        name TEXT PRIMARY KEY,
        doc_count INTEGER NOT NULL,
        built_at INTEGER NOT NULL
    )
"#;

#[async_trait]
impl SearchBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let table = table_name(index)?;
        if !self.registry_exists().await? {
            return Ok(false);
        }

        let registered: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM search_indexes WHERE name = ?")
                .bind(index)
                .fetch_one(&self.pool)
                .await?;
        let table_exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sqlite_master WHERE name = ?")
                .bind(&table)
                .fetch_one(&self.pool)
                .await?;

        Ok(registered && table_exists)
    }

    async fn replace_index(
        &self,
        index: &str,
        docs: &[IndexedDocument],
        progress: &dyn RebuildProgressReporter,
    ) -> Result<()> {
        let table = table_name(index)?;
        let total = docs.len() as u64;
        let mut tx = self.pool.begin().await?;

        sqlx::query(CREATE_REGISTRY).execute(&mut *tx).await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE {} USING fts5(doc_id UNINDEXED, question, answer, topic, title)",
            table
        ))
        .execute(&mut *tx)
        .await?;
        progress.report(RebuildProgressEvent::Created {
            index: index.to_string(),
        });

        let insert = format!(
            "INSERT INTO {} (doc_id, question, answer, topic, title) VALUES (?, ?, ?, ?, ?)",
            table
        );
        for (n, doc) in docs.iter().enumerate() {
            sqlx::query(&insert)
                .bind(doc.doc_id as i64)
                .bind(&doc.record.question)
                .bind(&doc.record.answer)
                .bind(&doc.record.topic)
                .bind(&doc.record.title)
                .execute(&mut *tx)
                .await?;

            let written = n as u64 + 1;
            if written % REPORT_EVERY == 0 || written == total {
                progress.report(RebuildProgressEvent::Loading {
                    index: index.to_string(),
                    n: written,
                    total,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO search_indexes (name, doc_count, built_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                doc_count = excluded.doc_count,
                built_at = excluded.built_at
            "#,
        )
        .bind(index)
        .bind(total as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let table = table_name(index)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(CREATE_REGISTRY).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM search_indexes WHERE name = ?")
            .bind(index)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let table = table_name(index)?;
        if request.terms.is_empty() {
            return Ok(SearchResponse {
                hits: Vec::new(),
                total_hits: 0,
                took_ms: None,
            });
        }
        let expr = match_expression(&request.terms);
        let w = &request.weights;

        // bm25() takes one weight per column, doc_id included; lower is
        // better, so negate it into a descending score.
        let rows = sqlx::query(&format!(
            r#"
            SELECT CAST(doc_id AS INTEGER) AS doc_id, answer, topic, title,
                   -bm25({t}, 0.0, {wq:?}, {wa:?}, {wt:?}, {wl:?}) AS score
            FROM {t}
            WHERE {t} MATCH ?
            ORDER BY score DESC, CAST(doc_id AS INTEGER) ASC
            LIMIT ?
            "#,
            t = table,
            wq = w.question,
            wa = w.answer,
            wt = w.topic,
            wl = w.title,
        ))
        .bind(&expr)
        .bind(request.size as i64)
        .fetch_all(&self.pool)
        .await?;

        let total_hits: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {t} WHERE {t} MATCH ?",
            t = table
        ))
        .bind(&expr)
        .fetch_one(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let doc_id: i64 = row.get("doc_id");
                BackendHit {
                    doc_id: doc_id as u64,
                    score: row.get("score"),
                    answer: row.get("answer"),
                    topic: row.get("topic"),
                    title: row.get("title"),
                }
            })
            .collect();

        Ok(SearchResponse {
            hits,
            total_hits: total_hits as u64,
            took_ms: None,
        })
    }
}
