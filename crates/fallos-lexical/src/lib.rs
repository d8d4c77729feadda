//! fallos-lexical
//!
//! Tantivy BM25 ranking over whitespace tokens, keyed by corpus position, with
//! the raw paragraph texts persisted alongside as a parallel array.
pub mod index;
pub mod schema;
pub mod tokenize;

pub use index::{rank_top_k, LexicalIndex};
pub use tokenize::{corpus_token_filter, tokenize, tokenize_filtered, TokenFilter};
