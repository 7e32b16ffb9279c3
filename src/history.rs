//! Conversation and feedback history.
//!
//! Every answered question is stored as a conversation keyed by the id the
//! pipeline generated for it; users can then rate the answer up or down.
//! Lives in the same SQLite file as the default search backend.
//!
//! # Schema
//!
//! ```text
//! conversations (id TEXT PK, question, answer, created_at)
//! feedback      (id INTEGER PK, conversation_id -> conversations.id, score, created_at)
//! ```
//!
//! `created_at` is Unix time in milliseconds.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// A stored question and the answer it received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub created_at: i64,
}

/// Counts of positive and negative feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackStats {
    pub thumbs_up: i64,
    pub thumbs_down: i64,
}

/// Feedback is a thumbs up (`1`) or thumbs down (`-1`).
pub fn is_valid_score(score: i64) -> bool {
    score == 1 || score == -1
}

pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist. Safe to run repeatedly.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                score INTEGER NOT NULL CHECK (score IN (-1, 1)),
                created_at INTEGER NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_created ON conversations(created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_conversation(&self, id: Uuid, question: &str, answer: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (id, question, answer, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(question)
        .bind(answer)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn conversation_exists(&self, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// Record feedback for an existing conversation.
    ///
    /// # Errors
    ///
    /// Fails if `score` is not `1` or `-1`, or the conversation is unknown.
    pub async fn save_feedback(&self, conversation_id: &str, score: i64) -> Result<()> {
        if !is_valid_score(score) {
            bail!("feedback score must be 1 or -1, got {}", score);
        }
        if !self.conversation_exists(conversation_id).await? {
            bail!("unknown conversation: {}", conversation_id);
        }

        sqlx::query("INSERT INTO feedback (conversation_id, score, created_at) VALUES (?, ?, ?)")
            .bind(conversation_id)
            .bind(score)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Up to `limit` conversations, newest first.
    pub async fn recent_conversations(&self, limit: u32) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, question, answer, created_at
            FROM conversations
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Conversation {
                id: row.get("id"),
                question: row.get("question"),
                answer: row.get("answer"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn feedback_stats(&self) -> Result<FeedbackStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN score > 0 THEN 1 ELSE 0 END), 0) AS thumbs_up,
                COALESCE(SUM(CASE WHEN score < 0 THEN 1 ELSE 0 END), 0) AS thumbs_down
            FROM feedback
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(FeedbackStats {
            thumbs_up: row.get("thumbs_up"),
            thumbs_down: row.get("thumbs_down"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    async fn store() -> (TempDir, HistoryStore) {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path());
        let pool = crate::db::connect(&config).await.unwrap();
        let store = HistoryStore::new(pool);
        store.init().await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let (_tmp, store) = store().await;
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let (_tmp, store) = store().await;
        for q in ["first", "second", "third"] {
            store
                .save_conversation(Uuid::new_v4(), q, "answer")
                .await
                .unwrap();
        }

        let recent = store.recent_conversations(2).await.unwrap();
        let questions: Vec<&str> = recent.iter().map(|c| c.question.as_str()).collect();
        assert_eq!(questions, vec!["third", "second"]);
    }

    #[tokio::test]
    async fn feedback_counts() {
        let (_tmp, store) = store().await;
        let id = Uuid::new_v4();
        store.save_conversation(id, "q", "a").await.unwrap();
        let id = id.to_string();

        store.save_feedback(&id, 1).await.unwrap();
        store.save_feedback(&id, 1).await.unwrap();
        store.save_feedback(&id, -1).await.unwrap();

        assert_eq!(
            store.feedback_stats().await.unwrap(),
            FeedbackStats {
                thumbs_up: 2,
                thumbs_down: 1
            }
        );
    }

    #[tokio::test]
    async fn stats_on_empty_store_are_zero() {
        let (_tmp, store) = store().await;
        assert_eq!(store.feedback_stats().await.unwrap(), FeedbackStats::default());
    }

    #[tokio::test]
    async fn rejects_bad_score_and_unknown_conversation() {
        let (_tmp, store) = store().await;
        let id = Uuid::new_v4();
        store.save_conversation(id, "q", "a").await.unwrap();

        let err = store.save_feedback(&id.to_string(), 5).await.unwrap_err();
        assert!(err.to_string().contains("1 or -1"));

        let err = store.save_feedback("nope", 1).await.unwrap_err();
        assert!(err.to_string().contains("unknown conversation"));
    }
}
