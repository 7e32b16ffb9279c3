//! `assist search`: retrieval without generation.
//!
//! Useful for checking what context a question would receive before paying
//! for a generation call.

use anyhow::Result;

use crate::models::RetrievalResult;
use crate::pipeline::Pipeline;

pub async fn run_search(pipeline: &Pipeline, query: &str, top_k: usize, json: bool) -> Result<()> {
    let result = pipeline.retrieve(query, top_k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print!("{}", render(&result));
    Ok(())
}

fn render(result: &RetrievalResult) -> String {
    let d = &result.diagnostics;
    if result.is_empty() {
        return "No results.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{} of {} matches ({} ms)\n",
        result.hits.len(),
        d.total_hits,
        d.elapsed_ms
    ));
    for (i, hit) in result.hits.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. [{:.3}] doc {}\n   {}\n",
            i + 1,
            hit.score,
            hit.doc_id,
            hit.answer
        ));
    }

    let p = &result.provenance;
    if p.topic.is_some() || p.title.is_some() {
        out.push('\n');
        if let Some(topic) = &p.topic {
            out.push_str(&format!("topic: {}\n", topic));
        }
        if let Some(title) = &p.title {
            out.push_str(&format!("title: {}\n", title));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Diagnostics, Hit, Provenance};

    #[test]
    fn renders_hits_and_provenance() {
        let result = RetrievalResult {
            hits: vec![Hit {
                doc_id: 0,
                answer: "Model fits noise in training data.".into(),
                score: 2.5,
            }],
            provenance: Provenance {
                topic: Some("ml".into()),
                title: None,
            },
            diagnostics: Diagnostics {
                elapsed_ms: 3,
                total_hits: 2,
                top_score: Some(2.5),
            },
        };
        let text = render(&result);
        assert!(text.starts_with("1 of 2 matches (3 ms)"));
        assert!(text.contains("1. [2.500] doc 0\n   Model fits noise in training data."));
        assert!(text.contains("topic: ml"));
        assert!(!text.contains("title:"));
    }

    #[test]
    fn renders_empty() {
        let result = RetrievalResult {
            hits: Vec::new(),
            provenance: Provenance::default(),
            diagnostics: Diagnostics {
                elapsed_ms: 0,
                total_hits: 0,
                top_score: None,
            },
        };
        assert_eq!(render(&result), "No results.\n");
    }
}
