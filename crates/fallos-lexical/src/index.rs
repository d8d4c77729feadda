//! BM25 index over pre-tokenized paragraphs plus the parallel raw-text array.
//!
//! On-disk layout of a lexical directory:
//! - `bm25/`: tantivy index, one document per paragraph keyed by `position`
//! - `corpus.json`: JSON array of raw paragraph texts, indexed by position
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tantivy::collector::{Collector, SegmentCollector};
use tantivy::columnar::Column;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::{doc, DocId, Index, IndexReader, IndexWriter, Score, SegmentOrdinal, SegmentReader, Term};
use tracing::{debug, info};

use fallos_core::error::{Error, Result};
use fallos_core::fingerprint::write_json_atomic;
use fallos_core::types::Position;

use crate::schema::{build_schema, register_tokenizer, POSITION_FIELD, TOKENS_FIELD};

pub const BM25_DIR: &str = "bm25";
pub const TEXTS_FILE: &str = "corpus.json";
const WRITER_HEAP_BYTES: usize = 50_000_000;

fn lexical_err(e: impl std::fmt::Display) -> Error { Error::Lexical(e.to_string()) }

pub struct LexicalIndex {
    dir: PathBuf,
    reader: IndexReader,
    tokens_field: Field,
    texts: Vec<String>,
}

impl LexicalIndex {
    /// Build into `dir`, replacing anything there. `token_lists[i]` and `texts[i]`
    /// describe the paragraph at position `i`.
    pub fn build<T: AsRef<str> + Serialize>(dir: &Path, token_lists: &[Vec<String>], texts: &[T]) -> Result<Self> {
        if token_lists.len() != texts.len() {
            return Err(Error::Lexical(format!(
                "{} token lists for {} paragraph texts",
                token_lists.len(),
                texts.len()
            )));
        }
        let started = Instant::now();
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        let bm25_dir = dir.join(BM25_DIR);
        fs::create_dir_all(&bm25_dir)?;

        let schema = build_schema();
        let index = Index::create_in_dir(&bm25_dir, schema.clone()).map_err(lexical_err)?;
        register_tokenizer(&index);
        let position_field = schema.get_field(POSITION_FIELD).map_err(lexical_err)?;
        let tokens_field = schema.get_field(TOKENS_FIELD).map_err(lexical_err)?;

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(lexical_err)?;
        for (position, tokens) in token_lists.iter().enumerate() {
            writer
                .add_document(doc!(position_field => position as u64, tokens_field => tokens.join(" ")))
                .map_err(lexical_err)?;
        }
        writer.commit().map_err(lexical_err)?;
        writer.wait_merging_threads().map_err(lexical_err)?;

        write_json_atomic(&dir.join(TEXTS_FILE), &texts)?;
        info!(dir = %dir.display(), paragraphs = texts.len(), elapsed_ms = started.elapsed().as_millis(), "lexical index built");
        Self::open(dir)
    }

    /// Open a built directory. Fails with `MissingIndexArtifact` naming the first missing file.
    pub fn open(dir: &Path) -> Result<Self> {
        let meta = dir.join(BM25_DIR).join("meta.json");
        if !meta.exists() {
            return Err(Error::MissingIndexArtifact(meta));
        }
        let texts_path = dir.join(TEXTS_FILE);
        if !texts_path.exists() {
            return Err(Error::MissingIndexArtifact(texts_path));
        }

        let index = Index::open_in_dir(dir.join(BM25_DIR)).map_err(lexical_err)?;
        register_tokenizer(&index);
        let tokens_field = index.schema().get_field(TOKENS_FIELD).map_err(lexical_err)?;
        let reader = index.reader().map_err(lexical_err)?;
        let texts: Vec<String> = serde_json::from_slice(&fs::read(&texts_path)?)?;

        let docs = reader.searcher().num_docs();
        if docs != texts.len() as u64 {
            return Err(Error::Lexical(format!(
                "{} holds {} documents but {} has {} texts",
                BM25_DIR,
                docs,
                TEXTS_FILE,
                texts.len()
            )));
        }
        debug!(dir = %dir.display(), paragraphs = texts.len(), "lexical index opened");
        Ok(Self { dir: dir.to_path_buf(), reader, tokens_field, texts })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn len(&self) -> usize { self.texts.len() }

    pub fn is_empty(&self) -> bool { self.texts.is_empty() }

    pub fn text(&self, position: Position) -> Option<&str> {
        usize::try_from(position).ok().and_then(|i| self.texts.get(i)).map(String::as_str)
    }

    pub fn texts(&self) -> &[String] { &self.texts }

    /// BM25 score of every position for the query tokens; 0 where nothing matches.
    pub fn score(&self, query_tokens: &[String]) -> Result<Vec<f32>> {
        let mut scores = vec![0f32; self.texts.len()];
        if query_tokens.is_empty() || self.texts.is_empty() {
            return Ok(scores);
        }
        let clauses: Vec<(Occur, Box<dyn Query>)> = query_tokens
            .iter()
            .map(|t| {
                let term = Term::from_field_text(self.tokens_field, t);
                let q: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, q)
            })
            .collect();
        let query = BooleanQuery::new(clauses);
        let hits = self.reader.searcher().search(&query, &PositionScores).map_err(lexical_err)?;
        for (position, score) in hits {
            if let Some(slot) = usize::try_from(position).ok().and_then(|i| scores.get_mut(i)) {
                *slot = score;
            }
        }
        Ok(scores)
    }

    /// The `k` best positions, score descending then position ascending.
    pub fn top_k(&self, query_tokens: &[String], k: usize) -> Result<Vec<(Position, f32)>> {
        Ok(rank_top_k(&self.score(query_tokens)?, k))
    }

    /// Bytes used by the BM25 directory and the text array.
    pub fn size_on_disk(&self) -> (u64, u64) {
        let bm25 = walkdir::WalkDir::new(self.dir.join(BM25_DIR))
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter_map(|e| e.metadata().ok())
            .filter(std::fs::Metadata::is_file)
            .map(|m| m.len())
            .sum();
        let texts = fs::metadata(self.dir.join(TEXTS_FILE)).map(|m| m.len()).unwrap_or(0);
        (bm25, texts)
    }
}

/// Top `k` of a dense score vector, score descending with ties broken by ascending position.
pub fn rank_top_k(scores: &[f32], k: usize) -> Vec<(Position, f32)> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }
    let cmp = |a: &usize, b: &usize| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b));
    let mut order: Vec<usize> = (0..scores.len()).collect();
    if k < order.len() {
        order.select_nth_unstable_by(k - 1, cmp);
        order.truncate(k);
    }
    order.sort_unstable_by(cmp);
    order.into_iter().map(|i| (i as Position, scores[i])).collect()
}

/// Collects `(position, score)` for every matching document.
struct PositionScores;

struct PositionScoresSegment {
    positions: Column<u64>,
    hits: Vec<(u64, Score)>,
}

impl Collector for PositionScores {
    type Fruit = Vec<(u64, Score)>;
    type Child = PositionScoresSegment;

    fn for_segment(&self, _segment_local_id: SegmentOrdinal, segment: &SegmentReader) -> tantivy::Result<Self::Child> {
        let positions = segment.fast_fields().u64(POSITION_FIELD)?;
        Ok(PositionScoresSegment { positions, hits: Vec::new() })
    }

    fn requires_scoring(&self) -> bool { true }

    fn merge_fruits(&self, fruits: Vec<Vec<(u64, Score)>>) -> tantivy::Result<Self::Fruit> {
        Ok(fruits.into_iter().flatten().collect())
    }
}

impl SegmentCollector for PositionScoresSegment {
    type Fruit = Vec<(u64, Score)>;

    fn collect(&mut self, doc: DocId, score: Score) {
        if let Some(position) = self.positions.first(doc) {
            self.hits.push((position, score));
        }
    }

    fn harvest(self) -> Self::Fruit { self.hits }
}
