//! `assist ask`, `assist feedback` and `assist history`.

use anyhow::{bail, Result};

use crate::history::HistoryStore;
use crate::pipeline::{AnswerResponse, Pipeline};

/// Answer a question and record the conversation.
pub async fn run_ask(
    pipeline: &Pipeline,
    history: &HistoryStore,
    question: &str,
    top_k: usize,
    rebuild: bool,
    json: bool,
) -> Result<()> {
    let response = pipeline.answer(question, top_k, rebuild).await?;
    history
        .save_conversation(response.conversation_id, question, &response.answer)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render_answer(&response));
    }
    Ok(())
}

fn render_answer(response: &AnswerResponse) -> String {
    let d = &response.diagnostics;
    let mut out = format!("{}\n\n", response.answer);
    out.push_str(&format!("conversation: {}\n", response.conversation_id));
    out.push_str(&format!(
        "retrieval:    {} matches, top score {}, {} ms\n",
        d.total_hits,
        d.top_score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string()),
        d.elapsed_ms
    ));
    if let Some(topic) = &response.provenance.topic {
        out.push_str(&format!("topic:        {}\n", topic));
    }
    if let Some(title) = &response.provenance.title {
        out.push_str(&format!("title:        {}\n", title));
    }
    if response.prompt_truncated {
        out.push_str("note:         prompt was truncated to the input limit\n");
    }
    out
}

/// Parse `up`/`down` (or `1`/`-1`) into a feedback score.
pub fn parse_vote(vote: &str) -> Result<i64> {
    match vote {
        "up" | "+1" | "1" => Ok(1),
        "down" | "-1" => Ok(-1),
        other => bail!("vote must be 'up' or 'down', got '{}'", other),
    }
}

pub async fn run_feedback(history: &HistoryStore, conversation_id: &str, vote: &str) -> Result<()> {
    let score = parse_vote(vote)?;
    history.save_feedback(conversation_id, score).await?;
    println!("Recorded {} for {}", vote, conversation_id);
    Ok(())
}

pub async fn run_history(history: &HistoryStore, limit: u32) -> Result<()> {
    let conversations = history.recent_conversations(limit).await?;
    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    for c in &conversations {
        let when = chrono::DateTime::from_timestamp_millis(c.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{}  {}", when, c.id);
        println!("  Q: {}", c.question);
        println!("  A: {}", truncate_line(&c.answer, 120));
    }
    Ok(())
}

fn truncate_line(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}
