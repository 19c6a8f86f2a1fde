//! Section heading and page detection for chunk source context

use regex::Regex;
use std::sync::OnceLock;

use crate::types::SourceContext;

/// Longest line still considered a heading
const MAX_HEADING_LEN: usize = 100;

/// Lines of a chunk scanned for an inline heading
const HEADING_PROBE_LINES: usize = 3;

const FORM_FEED: char = '\u{000C}';

fn numbered_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)*\.?\s+\p{Lu}").expect("Invalid regex"))
}

/// Headings and page breaks of one document, indexed by byte offset
pub(crate) struct SectionMap {
    /// (line start offset, heading title), ascending
    headings: Vec<(usize, String)>,
    /// Offsets of form feeds, ascending
    page_breaks: Vec<usize>,
}

impl SectionMap {
    pub(crate) fn build(text: &str) -> Self {
        let mut headings = Vec::new();
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            // A form feed starts a new page; the heading may follow it on the same line
            let content = line.trim_start_matches(FORM_FEED);
            let lead = line.len() - content.len();
            if let Some(title) = heading_title(content) {
                headings.push((offset + lead, title));
            }
            offset += line.len();
        }

        let page_breaks = text
            .char_indices()
            .filter(|(_, c)| *c == FORM_FEED)
            .map(|(i, _)| i)
            .collect();

        Self {
            headings,
            page_breaks,
        }
    }

    /// Source context for a chunk starting at `start` whose text is `chunk_text`
    pub(crate) fn context_for(&self, start: usize, chunk_text: &str) -> SourceContext {
        let probe_len: usize = chunk_text
            .split_inclusive('\n')
            .take(HEADING_PROBE_LINES)
            .map(str::len)
            .sum();
        let probe_end = start + probe_len;

        let idx = self.headings.partition_point(|(pos, _)| *pos < probe_end);
        let section = idx
            .checked_sub(1)
            .map(|i| self.headings[i].1.clone());

        let page = if self.page_breaks.is_empty() {
            None
        } else {
            let breaks_before = self.page_breaks.partition_point(|pos| *pos < start);
            Some(breaks_before as u32 + 1)
        };

        SourceContext { section, page }
    }
}

/// Recognize a heading line and return its title
fn heading_title(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.len() > MAX_HEADING_LEN {
        return None;
    }

    if line.starts_with('#') {
        let title = line.trim_start_matches('#').trim();
        return (!title.is_empty()).then(|| title.to_string());
    }

    if line.ends_with('.') {
        return None;
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase()) {
        return Some(line.to_string());
    }

    if numbered_heading().is_match(line) {
        return Some(line.to_string());
    }

    if let Some(title) = line.strip_suffix(':') {
        let starts_upper = title.chars().next().is_some_and(char::is_uppercase);
        if starts_upper && title.split_whitespace().count() <= 8 {
            return Some(title.trim().to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_forms() {
        assert_eq!(heading_title("## Getting Started"), Some("Getting Started".into()));
        assert_eq!(heading_title("TERMS AND CONDITIONS"), Some("TERMS AND CONDITIONS".into()));
        assert_eq!(heading_title("2.1 Scope of Work"), Some("2.1 Scope of Work".into()));
        assert_eq!(heading_title("Payment Terms:"), Some("Payment Terms".into()));
        assert_eq!(heading_title("This is an ordinary sentence."), None);
        assert_eq!(heading_title("and then:"), None);
    }

    #[test]
    fn test_context_uses_nearest_preceding_heading() {
        let text = "# Intro\nFirst part.\n\n# Details\nSecond part.\nMore.\nEven more.\n";
        let map = SectionMap::build(text);
        let second = text.find("More.").unwrap();
        let ctx = map.context_for(second, &text[second..]);
        assert_eq!(ctx.section.as_deref(), Some("Details"));
        assert_eq!(ctx.page, None);
    }

    #[test]
    fn test_pages_from_form_feeds() {
        let text = "page one text\u{000C}page two text\u{000C}page three";
        let map = SectionMap::build(text);
        assert_eq!(map.context_for(0, "page one").page, Some(1));
        let third = text.find("page three").unwrap();
        assert_eq!(map.context_for(third, "page three").page, Some(3));
    }
}
