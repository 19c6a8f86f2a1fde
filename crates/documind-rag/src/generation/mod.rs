//! Answer generation with inline citations

pub mod citation;
pub mod composer;
pub mod prompt;

pub use citation::{
    extract_and_link_citations, format_sources_markdown, truncate_snippet, LinkedAnswer,
};
pub use composer::{AnswerComposer, ComposedAnswer};
pub use prompt::{ContextWindow, PromptBuilder};
