//! Citation extraction and linking
//!
//! Markers in generated text are matched back to the context they were
//! assigned to. A marker with no matching context entry is removed from the
//! answer and reported, never turned into a citation.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::types::{Citation, CitationReport, RankedResult};

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("Invalid regex"))
}

/// Answer text with its verified citations
#[derive(Debug, Clone)]
pub struct LinkedAnswer {
    /// Generated text with dangling markers removed
    pub answer_text: String,
    /// In order of first appearance
    pub citations: Vec<Citation>,
    pub report: CitationReport,
}

/// Numbers in the body of one marker, e.g. `2, 3` of `[2, 3]`
fn marker_numbers(list: &str) -> impl Iterator<Item = usize> + '_ {
    list.split(',').filter_map(|n| n.trim().parse().ok())
}

/// Link markers in `answer` to `context`, where `[n]` is `context[n - 1]`.
pub fn extract_and_link_citations(
    answer: &str,
    context: &[&RankedResult],
    snippet_length: usize,
    max_citations: usize,
) -> LinkedAnswer {
    let mut cleaned = String::with_capacity(answer.len());
    let mut cited: Vec<usize> = Vec::new();
    let mut dropped: Vec<String> = Vec::new();
    let mut last = 0;

    for cap in marker_regex().captures_iter(answer) {
        let Some(whole) = cap.get(0) else {
            continue;
        };
        cleaned.push_str(&answer[last..whole.start()]);
        last = whole.end();

        let mut valid = Vec::new();
        for n in marker_numbers(&cap[1]) {
            if (1..=context.len()).contains(&n) {
                valid.push(n);
                if !cited.contains(&n) {
                    cited.push(n);
                }
            } else {
                let marker = format!("[{}]", n);
                tracing::debug!("Dropping citation marker {} with no source in context", marker);
                if !dropped.contains(&marker) {
                    dropped.push(marker);
                }
            }
        }

        if valid.is_empty() {
            let kept = cleaned.trim_end_matches([' ', '\t']).len();
            cleaned.truncate(kept);
        } else {
            let list: Vec<String> = valid.iter().map(|n| n.to_string()).collect();
            cleaned.push_str(&format!("[{}]", list.join(", ")));
        }
    }
    cleaned.push_str(&answer[last..]);

    let citations: Vec<Citation> = cited
        .iter()
        .take(max_citations)
        .map(|&n| {
            let result = context[n - 1];
            let chunk = &result.chunk;
            Citation {
                marker: format!("[{}]", n),
                chunk_id: result.chunk_id,
                snippet: truncate_snippet(&chunk.text, snippet_length),
                sequence_index: chunk.sequence_index,
                section: chunk.source_context.section.clone(),
                page: chunk.source_context.page,
                rerank_score: result.rerank_score,
            }
        })
        .collect();

    let cited_set: HashSet<usize> = cited.iter().copied().collect();
    let report = CitationReport {
        unused_markers: (1..=context.len())
            .filter(|n| !cited_set.contains(n))
            .map(|n| format!("[{}]", n))
            .collect(),
        dropped_markers: dropped,
        coverage: if context.is_empty() {
            0.0
        } else {
            cited_set.len() as f32 / context.len() as f32
        },
    };

    LinkedAnswer {
        answer_text: cleaned.trim().to_string(),
        citations,
        report,
    }
}

/// Prefix of `snippet` of at most `max_len` bytes, cut at a word boundary when possible
pub fn truncate_snippet(snippet: &str, max_len: usize) -> String {
    let snippet = snippet.trim();
    if snippet.len() <= max_len {
        return snippet.to_string();
    }

    let mut end = max_len;
    while end > 0 && !snippet.is_char_boundary(end) {
        end -= 1;
    }

    match snippet[..end].rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => snippet[..pos].trim_end().to_string(),
        _ => snippet[..end].to_string(),
    }
}

/// Render citations as a markdown source list
pub fn format_sources_markdown(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }

    let mut md = String::from("**Sources**\n\n");
    for citation in citations {
        let mut location = vec![format!("chunk {}", citation.sequence_index + 1)];
        if let Some(page) = citation.page {
            location.push(format!("page {}", page));
        }
        if let Some(section) = &citation.section {
            location.push(section.clone());
        }
        md.push_str(&format!(
            "**{}** {}\n> {}\n\n",
            citation.marker,
            location.join(", "),
            citation.snippet.replace('\n', " ")
        ));
    }
    md
}
