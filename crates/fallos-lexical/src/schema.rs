use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, INDEXED, STORED};
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer};
use tantivy::Index;

pub const POSITION_FIELD: &str = "position";
pub const TOKENS_FIELD: &str = "tokens";
pub const TOKENIZER_NAME: &str = "fallos_whitespace";

/// `position` keys the parallel text array; `tokens` holds the pre-tokenized paragraph.
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_u64_field(POSITION_FIELD, INDEXED | STORED | FAST);
    let indexing = TextFieldIndexing::default()
        .set_tokenizer(TOKENIZER_NAME)
        .set_index_option(IndexRecordOption::WithFreqs);
    schema_builder.add_text_field(TOKENS_FIELD, TextOptions::default().set_indexing_options(indexing));
    schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
    let tokenizer = TextAnalyzer::builder(WhitespaceTokenizer::default()).filter(LowerCaser).build();
    index.tokenizers().register(TOKENIZER_NAME, tokenizer);
}
