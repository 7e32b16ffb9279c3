//! Index and feedback overview.
//!
//! Used by `assist stats` to confirm the index is built and to see how users
//! rate the answers.

use anyhow::Result;

use crate::config::GenerationConfig;
use crate::history::HistoryStore;
use crate::index::IndexState;
use crate::pipeline::Pipeline;

/// Run the stats command and print a summary.
pub async fn run_stats(pipeline: &Pipeline, history: &HistoryStore) -> Result<()> {
    let config = pipeline.config();
    let state = pipeline.index_state().await?;
    let feedback = history.feedback_stats().await?;
    let recent = history.recent_conversations(1).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Course Assistant - Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Corpus:      {}", config.corpus.path.display());
    println!();
    println!("  Index:       {} ({})", config.index.name, config.index.backend);
    println!("  State:       {}", describe_state(&state));
    println!("  Generation:  {}", describe_generation(&config.generation));
    println!();
    println!("  Thumbs up:   {}", feedback.thumbs_up);
    println!("  Thumbs down: {}", feedback.thumbs_down);
    if let Some(last) = recent.first() {
        let when = chrono::DateTime::from_timestamp_millis(last.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| last.created_at.to_string());
        println!("  Last asked:  {}", when);
    }
    println!();

    Ok(())
}

fn describe_state(state: &IndexState) -> String {
    match state {
        IndexState::Empty => "not built (run `assist index`)".to_string(),
        IndexState::Building => "rebuilding".to_string(),
        IndexState::Indexed {
            doc_count: Some(n),
            fingerprint,
        } => match fingerprint {
            Some(fp) => format!("ready, {} docs, fingerprint {}", n, &fp[..fp.len().min(12)]),
            None => format!("ready, {} docs", n),
        },
        IndexState::Indexed { .. } => "ready".to_string(),
        IndexState::Failed { message } => format!("failed: {}", message),
    }
}

fn describe_generation(generation: &GenerationConfig) -> String {
    if !generation.is_enabled() {
        return "disabled".to_string();
    }
    let model = generation.model.as_deref().unwrap_or("default model");
    match &generation.tokenizer {
        Some(path) => format!("{} ({}), tokenizer {}", generation.provider, model, path.display()),
        None => format!("{} ({}), word-count bounds", generation.provider, model),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn states() {
        assert!(describe_state(&IndexState::Empty).contains("assist index"));
        let ready = IndexState::Indexed {
            doc_count: Some(2),
            fingerprint: Some("abcdef0123456789".into()),
        };
        assert_eq!(describe_state(&ready), "ready, 2 docs, fingerprint abcdef012345");
        let discovered = IndexState::Indexed {
            doc_count: None,
            fingerprint: None,
        };
        assert_eq!(describe_state(&discovered), "ready");
    }

    #[test]
    fn generation() {
        assert_eq!(describe_generation(&GenerationConfig::default()), "disabled");
        let hf = GenerationConfig {
            provider: "huggingface".into(),
            model: Some("flan-t5-base".into()),
            ..Default::default()
        };
        assert_eq!(
            describe_generation(&hf),
            "huggingface (flan-t5-base), word-count bounds"
        );
    }
}
