// Context assembly for RAG-augmented prompts
//
// Retrieved passages become numbered, score-labelled entries; the formatted
// conversation history follows when there is one.
use serde::{Deserialize, Serialize};

use crate::memory::conversation::NO_HISTORY;
use crate::memory::vector_db::SearchHit;

/// Context text used when neither passages nor history are available
pub const NO_CONTEXT: &str = "No relevant context";

/// Marker appended to a passage cut for display
const TRUNCATION_MARKER: &str = "...";

/// Assembled context for prompt augmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    /// The formatted context text
    pub text: String,
    /// Number of passages included
    pub passage_count: usize,
    /// Whether conversation history was appended
    pub includes_history: bool,
}

/// Builds the context block handed to the prompt template
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    passage_display_chars: Option<usize>,
}

impl ContextBuilder {
    /// `passage_display_chars`: per-passage cap in characters, `None` for uncapped
    pub fn new(passage_display_chars: Option<usize>) -> Self {
        Self {
            passage_display_chars,
        }
    }

    /// Build context from passages (best first) and formatted history
    pub fn build(&self, passages: &[&SearchHit], formatted_history: &str) -> AssembledContext {
        let mut parts: Vec<String> = passages
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "[Document {}] (similarity: {:.2}): {}",
                    i + 1,
                    hit.score,
                    self.display(&hit.text)
                )
            })
            .collect();

        let includes_history = has_history(formatted_history);
        if includes_history {
            parts.push(formatted_history.to_string());
        }

        let text = if parts.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            parts.join("\n\n")
        };

        AssembledContext {
            text,
            passage_count: passages.len(),
            includes_history,
        }
    }

    /// Passage text as shown in the prompt
    pub fn display(&self, text: &str) -> String {
        match self.passage_display_chars {
            Some(limit) if text.chars().count() > limit => {
                let mut short: String = text.chars().take(limit).collect();
                short.push_str(TRUNCATION_MARKER);
                short
            }
            _ => text.to_string(),
        }
    }

    pub fn passage_display_chars(&self) -> Option<usize> {
        self.passage_display_chars
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(Some(200))
    }
}

fn has_history(formatted_history: &str) -> bool {
    !formatted_history.trim().is_empty() && formatted_history != NO_HISTORY
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(text: &str, score: f32) -> SearchHit {
        SearchHit {
            position: 0,
            text: text.to_string(),
            source_id: "tax_law.pdf".to_string(),
            score,
        }
    }

    #[test]
    fn test_passages_are_numbered_with_similarity() {
        let a = hit("Late filing is fined.", 0.91);
        let b = hit("Deadline is June 30.", 0.5);
        let context = ContextBuilder::default().build(&[&a, &b], NO_HISTORY);

        assert_eq!(
            context.text,
            "[Document 1] (similarity: 0.91): Late filing is fined.\n\n\
             [Document 2] (similarity: 0.50): Deadline is June 30."
        );
        assert_eq!(context.passage_count, 2);
        assert!(!context.includes_history);
    }

    #[test]
    fn test_long_passage_truncated_by_chars() {
        let long = "法".repeat(250);
        let passage = hit(&long, 0.8);
        let context = ContextBuilder::default().build(&[&passage], NO_HISTORY);

        let expected = format!("[Document 1] (similarity: 0.80): {}...", "法".repeat(200));
        assert_eq!(context.text, expected);
    }

    #[test]
    fn test_uncapped_display() {
        let long = "x".repeat(500);
        assert_eq!(ContextBuilder::new(None).display(&long), long);
    }

    #[test]
    fn test_history_appended() {
        let passage = hit("Late filing is fined.", 0.91);
        let history = "Recent conversation history:\n1. User: hi\n";
        let context = ContextBuilder::default().build(&[&passage], history);

        assert!(context.text.ends_with(history));
        assert!(context.includes_history);
    }

    #[test]
    fn test_history_only() {
        let history = "Recent conversation history:\n1. User: hi\n";
        let context = ContextBuilder::default().build(&[], history);
        assert_eq!(context.text, history);
    }

    #[test]
    fn test_nothing_yields_sentinel() {
        let context = ContextBuilder::default().build(&[], NO_HISTORY);
        assert_eq!(context.text, NO_CONTEXT);
        assert_eq!(context.passage_count, 0);
    }
}
