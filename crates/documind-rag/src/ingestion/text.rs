//! Text normalization and the token model shared by chunking and context budgeting

use unicode_segmentation::UnicodeSegmentation;

/// A token's byte range in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
}

/// Split text into tokens: every non-whitespace word-boundary segment.
///
/// Words, numbers and individual punctuation marks each count as one token.
pub fn tokenize(text: &str) -> Vec<Token> {
    text.split_word_bound_indices()
        .filter(|(_, segment)| !segment.chars().all(char::is_whitespace))
        .map(|(start, segment)| Token {
            start,
            end: start + segment.len(),
        })
        .collect()
}

/// Number of tokens in `text`
pub fn count_tokens(text: &str) -> usize {
    text.split_word_bounds()
        .filter(|segment| !segment.chars().all(char::is_whitespace))
        .count()
}

/// Normalize extracted text before chunking.
///
/// Line endings become `\n`; control characters other than newline, tab and
/// form feed (page break) are removed.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\u{000C}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_words_and_punctuation() {
        let text = "Hello, world!  It's 3.14.";
        let tokens: Vec<&str> = tokenize(text)
            .iter()
            .map(|t| &text[t.start..t.end])
            .collect();
        assert_eq!(tokens, vec!["Hello", ",", "world", "!", "It's", "3.14", "."]);
        assert_eq!(count_tokens(text), tokens.len());
    }

    #[test]
    fn test_whitespace_only_has_no_tokens() {
        assert!(tokenize(" \n\t\n ").is_empty());
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_normalize_text() {
        let raw = "Line one\r\nLine two\rLine\u{0007} three\u{000C}Page two";
        assert_eq!(
            normalize_text(raw),
            "Line one\nLine two\nLine three\u{000C}Page two"
        );
    }
}
