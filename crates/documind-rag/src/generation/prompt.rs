//! Prompt templates for grounded answer generation

use crate::types::RankedResult;

/// Context assembled from ranked chunks within the token budget
#[derive(Debug, Clone)]
pub struct ContextWindow<'a> {
    /// Chunks that fit, in rank order; marker `[n]` is position `n - 1`
    pub entries: Vec<&'a RankedResult>,
    pub text: String,
    /// Sum of the included chunks' token counts
    pub tokens: usize,
}

/// Prompt builder for RAG queries
pub struct PromptBuilder;

impl PromptBuilder {
    /// Tag ranked chunks with `[1]`, `[2]`, … until the next one would exceed `max_tokens`.
    ///
    /// Chunks are never cut; the first chunk that does not fit ends the window.
    /// The top-ranked chunk is always included so the window is never empty
    /// while results exist.
    pub fn build_context(results: &[RankedResult], max_tokens: usize) -> ContextWindow<'_> {
        let mut entries = Vec::new();
        let mut text = String::new();
        let mut tokens = 0;

        for result in results {
            let chunk_tokens = result.chunk.token_count;
            if !entries.is_empty() && tokens + chunk_tokens > max_tokens {
                tracing::debug!(
                    "Context budget reached at {} of {} chunks ({} tokens)",
                    entries.len(),
                    results.len(),
                    tokens
                );
                break;
            }
            tokens += chunk_tokens;
            entries.push(result);

            text.push_str(&format!(
                "[{}] ({})\n{}\n\n---\n\n",
                entries.len(),
                result.chunk.source_ref(),
                result.chunk.text
            ));
        }

        ContextWindow {
            entries,
            text,
            tokens,
        }
    }

    /// Build the full RAG prompt with strict grounding
    pub fn build_rag_prompt(question: &str, context: &ContextWindow<'_>) -> String {
        let markers: Vec<String> = (1..=context.entries.len())
            .map(|n| format!("[{}]", n))
            .collect();

        format!(
            r#"You are a document-grounded assistant that ONLY uses information from the excerpts below.

GROUNDING RULES:
1. ONLY use information that is EXPLICITLY stated in the EXCERPTS
2. If the answer is not in the excerpts, respond with "This information is not available in the provided document."
3. NEVER use external knowledge or make guesses beyond what is stated
4. Every claim MUST be followed by the marker of the excerpt supporting it, e.g. [1] or [2, 3]
5. ONLY use these markers: {markers}

EXCERPTS:
{context}
QUESTION: {question}

Answer using ONLY the excerpts above, citing them inline:"#,
            markers = markers.join(", "),
            context = context.text,
            question = question
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CharSpan, Chunk, SourceContext};
    use std::sync::Arc;
    use uuid::Uuid;

    fn ranked(rank: usize, tokens: usize, text: &str) -> RankedResult {
        let chunk = Chunk {
            id: Uuid::from_u128(rank as u128),
            document_id: Uuid::nil(),
            sequence_index: rank,
            text: text.to_string(),
            token_count: tokens,
            char_span: CharSpan { start: 0, end: text.len() },
            embedding: None,
            source_context: SourceContext {
                section: Some("Returns".to_string()),
                page: None,
            },
        };
        RankedResult {
            chunk_id: chunk.id,
            rerank_score: 1.0 / rank as f32,
            rank,
            chunk: Arc::new(chunk),
        }
    }

    #[test]
    fn test_context_stops_at_budget() {
        let results = vec![
            ranked(1, 400, "first"),
            ranked(2, 700, "second"),
            ranked(3, 100, "third"),
        ];
        let window = PromptBuilder::build_context(&results, 1000);
        // the third chunk would fit but follows one that did not
        assert_eq!(window.entries.len(), 1);
        assert_eq!(window.tokens, 400);
        assert!(window.text.contains("[1] (chunk 2, section: Returns)\nfirst"));
        assert!(!window.text.contains("[2]"));
        assert!(!window.text.contains("third"));
    }

    #[test]
    fn test_oversized_top_chunk_is_kept_alone() {
        let results = vec![ranked(1, 5000, "huge"), ranked(2, 10, "small")];
        let window = PromptBuilder::build_context(&results, 4000);
        assert_eq!(window.entries.len(), 1);
        assert!(PromptBuilder::build_context(&[], 4000).entries.is_empty());
    }

    #[test]
    fn test_prompt_lists_markers() {
        let results = vec![ranked(1, 10, "alpha"), ranked(2, 10, "beta")];
        let window = PromptBuilder::build_context(&results, 100);
        let prompt = PromptBuilder::build_rag_prompt("What is alpha?", &window);
        assert!(prompt.contains("ONLY use these markers: [1], [2]"));
        assert!(prompt.contains("QUESTION: What is alpha?"));
    }
}
