use serde::{Deserialize, Serialize};

use fallos_core::config::LexicalSettings;

/// Inclusive token length bounds (in chars) applied to large corpora.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFilter {
    pub min_len: usize,
    pub max_len: usize,
}

impl TokenFilter {
    pub fn keeps(&self, token: &str) -> bool {
        let n = token.chars().count();
        n >= self.min_len && n <= self.max_len
    }
}

/// Filter used when indexing a corpus of `corpus_len` paragraphs; `None` at or below the threshold.
pub fn corpus_token_filter(corpus_len: usize, settings: &LexicalSettings) -> Option<TokenFilter> {
    (corpus_len > settings.large_corpus_threshold)
        .then_some(TokenFilter { min_len: settings.min_token_len, max_len: settings.max_token_len })
}

/// Lower-cased whitespace tokens. Queries are always tokenized this way.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

pub fn tokenize_filtered(text: &str, filter: Option<TokenFilter>) -> Vec<String> {
    match filter {
        None => tokenize(text),
        Some(f) => text.split_whitespace().map(str::to_lowercase).filter(|t| f.keeps(t)).collect(),
    }
}
