//! Generation prompt template.

/// Rendered in place of the context list when retrieval found nothing.
pub const EMPTY_CONTEXT: &str = "(no context retrieved)";

/// Render the instruction prompt for `question` with the retrieved `answers`
/// as context, one `- {answer}` line each, in rank order.
///
/// Pure: identical inputs always produce identical output. No truncation is
/// applied here; the generator bounds its own input.
pub fn assemble(question: &str, answers: &[&str]) -> String {
    let context = if answers.is_empty() {
        EMPTY_CONTEXT.to_string()
    } else {
        answers
            .iter()
            .map(|a| format!("- {}", a))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You're a data science expert.\n\
         Provide concise and complete answers to the questions based on the context given below.\n\
         QUESTION: {}\n\
         \n\
         CONTEXT:\n\
         {}",
        question, context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_template() {
        let prompt = assemble(
            "What is overfitting?",
            &["Model fits noise in training data.", "Balance between underfitting and overfitting."],
        );
        assert_eq!(
            prompt,
            "You're a data science expert.\n\
             Provide concise and complete answers to the questions based on the context given below.\n\
             QUESTION: What is overfitting?\n\
             \n\
             CONTEXT:\n\
             - Model fits noise in training data.\n\
             - Balance between underfitting and overfitting."
        );
    }

    #[test]
    fn deterministic() {
        let a = assemble("q", &["x", "y"]);
        let b = assemble("q", &["x", "y"]);
        assert_eq!(a, b);
    }

    #[test]
    fn order_matters() {
        assert_ne!(assemble("q", &["x", "y"]), assemble("q", &["y", "x"]));
    }

    #[test]
    fn empty_context_keeps_shape() {
        let prompt = assemble("What is entropy?", &[]);
        assert!(prompt.contains("QUESTION: What is entropy?\n\nCONTEXT:\n"));
        assert!(prompt.ends_with(EMPTY_CONTEXT));
    }
}
