//! Query engine over one published index generation.
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use fallos_core::config::Settings;
use fallos_core::error::{Error, Result};
use fallos_core::traits::{CrossEncoder, DenseIndex, DenseStore, Embedder};
use fallos_core::types::{CandidateHit, SearchHit, SearchType};
use fallos_lexical::{tokenize, LexicalIndex};

use crate::boost::DomainBooster;
use crate::cache::QueryVectorCache;
use crate::manifest::IndexManifest;
use crate::merge::{merge_hits, missing_positions, select_top};

#[derive(Debug, Clone)]
struct QueryOptions {
    strategy: SearchType,
    k_dense: usize,
    k_lex: usize,
    max_top_n: usize,
    lexical_weight: f32,
    rerank: bool,
    rerank_batch_size: usize,
    rerank_max_chars: usize,
}

impl QueryOptions {
    fn from_settings(s: &Settings) -> Self {
        Self {
            strategy: s.search.strategy,
            k_dense: s.search.k_dense,
            k_lex: s.search.k_lex,
            max_top_n: s.search.max_top_n,
            lexical_weight: s.scoring.lexical_weight,
            rerank: s.search.enable_reranking && s.search.strategy.uses_lexical(),
            rerank_batch_size: s.reranker.batch_size.max(1),
            rerank_max_chars: s.reranker.max_chars,
        }
    }
}

/// Per-stage wall time of one query, in milliseconds.
#[derive(Debug, Default, Clone, Copy)]
struct StageTimings {
    encode: u128,
    dense: u128,
    lexical: u128,
    merge: u128,
    rerank: u128,
}

/// Snapshot of the engine's configuration and cache state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub strategy: SearchType,
    pub build_id: Option<String>,
    pub paragraphs: Option<usize>,
    pub k_dense: usize,
    pub k_lex: usize,
    pub max_top_n: usize,
    pub reranking: bool,
    pub query_cache_enabled: bool,
    pub cached_queries: usize,
}

/// Answers questions against a dense collection and, for hybrid strategies,
/// the lexical index of the same generation. Shareable across tasks behind an `Arc`.
pub struct HybridQueryEngine<D: DenseIndex> {
    dense: D,
    lexical: Option<LexicalIndex>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn CrossEncoder>>,
    cache: QueryVectorCache,
    booster: DomainBooster,
    options: QueryOptions,
    build_id: Option<String>,
}

/// `text` cut to at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

impl<D: DenseIndex> HybridQueryEngine<D> {
    /// Assemble an engine from already opened parts.
    ///
    /// Hybrid strategies require `lexical`, plus `reranker` when re-ranking is
    /// enabled. The dense strategy never re-ranks.
    pub fn new(
        settings: &Settings,
        dense: D,
        lexical: Option<LexicalIndex>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn CrossEncoder>>,
    ) -> Result<Self> {
        let options = QueryOptions::from_settings(settings);
        if options.strategy.uses_lexical() && lexical.is_none() {
            return Err(Error::InvalidConfig(format!("strategy '{}' needs a lexical index", options.strategy)));
        }
        if options.rerank && reranker.is_none() {
            return Err(Error::InvalidConfig("reranking enabled but no cross-encoder was provided".into()));
        }
        Ok(Self {
            dense,
            lexical,
            embedder,
            reranker,
            cache: QueryVectorCache::new(settings.search.enable_query_cache, settings.search.query_cache_size),
            booster: DomainBooster::new(&settings.scoring),
            options,
            build_id: None,
        })
    }

    /// Open the generation named by the live manifest under `settings.index_dir`.
    pub async fn open<S>(
        settings: &Settings,
        store: &S,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn CrossEncoder>>,
    ) -> Result<Self>
    where
        S: DenseStore<Collection = D>,
    {
        let manifest = IndexManifest::load(&settings.index_dir)?;
        if manifest.dimension != embedder.dim() {
            return Err(Error::InvalidConfig(format!(
                "index built with {}-dim vectors but the embedder produces {}",
                manifest.dimension,
                embedder.dim()
            )));
        }
        let dense = store.open_collection(&manifest.collection).await?;
        let lexical = if settings.search.strategy.uses_lexical() {
            let lexical = LexicalIndex::open(&manifest.lexical_path(&settings.index_dir))?;
            if lexical.len() != manifest.paragraph_count {
                return Err(Error::Lexical(format!(
                    "lexical index holds {} texts, manifest says {}",
                    lexical.len(),
                    manifest.paragraph_count
                )));
            }
            Some(lexical)
        } else {
            None
        };
        info!(build_id = %manifest.build_id, strategy = %settings.search.strategy, "query engine opened");
        let mut engine = Self::new(settings, dense, lexical, embedder, reranker)?;
        engine.build_id = Some(manifest.build_id);
        Ok(engine)
    }

    pub fn strategy(&self) -> SearchType { self.options.strategy }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            strategy: self.options.strategy,
            build_id: self.build_id.clone(),
            paragraphs: self.lexical.as_ref().map(LexicalIndex::len),
            k_dense: self.options.k_dense,
            k_lex: self.options.k_lex,
            max_top_n: self.options.max_top_n,
            reranking: self.options.rerank,
            query_cache_enabled: self.cache.is_enabled(),
            cached_queries: self.cache.len(),
        }
    }

    pub async fn query(&self, question: &str, top_n: usize) -> Result<Vec<SearchHit>> {
        self.query_with(question, top_n, None).await
    }

    /// Like [`HybridQueryEngine::query`]; `rerank` overrides the configured
    /// re-ranking switch for this call.
    pub async fn query_with(&self, question: &str, top_n: usize, rerank: Option<bool>) -> Result<Vec<SearchHit>> {
        if question.trim().is_empty() {
            return Err(Error::InvalidQuery("question is empty".into()));
        }
        if top_n == 0 || top_n > self.options.max_top_n {
            return Err(Error::InvalidQuery(format!("top_n must be between 1 and {}, got {top_n}", self.options.max_top_n)));
        }
        let rerank = rerank.unwrap_or(self.options.rerank) && self.options.strategy.uses_lexical();
        let started = Instant::now();
        let mut timings = StageTimings::default();

        let query_vec = self.encode(question)?;
        timings.encode = started.elapsed().as_millis();

        let candidates = match self.options.strategy {
            SearchType::Dense => {
                let t = Instant::now();
                let candidates = self.dense_candidates(&query_vec, top_n).await?;
                timings.dense = t.elapsed().as_millis();
                candidates
            }
            SearchType::Hybrid | SearchType::HybridEnriched => {
                let mut candidates = self.hybrid_candidates(question, &query_vec, &mut timings).await?;
                if self.options.strategy == SearchType::HybridEnriched {
                    self.booster.apply(question, &mut candidates);
                }
                if rerank {
                    let t = Instant::now();
                    self.rerank(question, &mut candidates)?;
                    timings.rerank = t.elapsed().as_millis();
                }
                candidates
            }
        };
        let considered = candidates.len();
        let hits: Vec<SearchHit> = select_top(candidates, top_n)
            .into_iter()
            .map(|c| SearchHit::from_candidate(c, self.options.strategy))
            .collect();

        info!(
            strategy = %self.options.strategy,
            candidates = considered,
            returned = hits.len(),
            rerank,
            encode_ms = timings.encode,
            dense_ms = timings.dense,
            lexical_ms = timings.lexical,
            merge_ms = timings.merge,
            rerank_ms = timings.rerank,
            total_ms = started.elapsed().as_millis(),
            "query answered"
        );
        Ok(hits)
    }

    fn encode(&self, question: &str) -> Result<Arc<Vec<f32>>> {
        self.cache.get_or_try_insert(question, || {
            let mut vectors = self
                .embedder
                .embed_batch(&[question.to_string()])
                .map_err(|e| Error::Embedding(e.to_string()))?;
            match vectors.pop() {
                Some(v) if v.len() == self.embedder.dim() => Ok(v),
                Some(v) => Err(Error::Embedding(format!("query vector has dimension {} (expected {})", v.len(), self.embedder.dim()))),
                None => Err(Error::Embedding("embedder returned no vector for the question".into())),
            }
        })
    }

    async fn dense_candidates(&self, query_vec: &[f32], top_n: usize) -> Result<Vec<CandidateHit>> {
        let hits = self.dense.search(query_vec, top_n.max(self.options.k_dense)).await?;
        Ok(hits
            .into_iter()
            .map(|h| CandidateHit {
                position: h.position,
                combined_score: h.score,
                dense_score: Some(h.score),
                lexical_score: None,
                payload: h.payload,
            })
            .collect())
    }

    async fn hybrid_candidates(&self, question: &str, query_vec: &[f32], timings: &mut StageTimings) -> Result<Vec<CandidateHit>> {
        let lexical = self
            .lexical
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("hybrid query without a lexical index".into()))?;

        let t = Instant::now();
        let dense_hits = self.dense.search(query_vec, self.options.k_dense).await?;
        timings.dense = t.elapsed().as_millis();

        let t = Instant::now();
        let lexical_hits = lexical.top_k(&tokenize(question), self.options.k_lex)?;
        timings.lexical = t.elapsed().as_millis();

        let t = Instant::now();
        let missing = missing_positions(&dense_hits, &lexical_hits);
        let fetched: HashMap<_, _> =
            if missing.is_empty() { HashMap::new() } else { self.dense.fetch(&missing).await?.into_iter().collect() };

        debug!(dense = dense_hits.len(), lexical = lexical_hits.len(), fetched = fetched.len(), "candidates gathered");
        let merged = merge_hits(dense_hits, &lexical_hits, fetched, self.options.lexical_weight);
        timings.merge = t.elapsed().as_millis();
        Ok(merged)
    }

    /// Replace every candidate's score with the cross-encoder's.
    fn rerank(&self, question: &str, candidates: &mut [CandidateHit]) -> Result<()> {
        let Some(reranker) = &self.reranker else {
            return Err(Error::Rerank("no cross-encoder loaded".into()));
        };
        for batch in candidates.chunks_mut(self.options.rerank_batch_size) {
            let passages: Vec<String> =
                batch.iter().map(|c| truncate_chars(&c.payload.text, self.options.rerank_max_chars)).collect();
            let scores = reranker.score_pairs(question, &passages).map_err(|e| Error::Rerank(e.to_string()))?;
            if scores.len() != batch.len() {
                return Err(Error::Rerank(format!("expected {} scores, got {}", batch.len(), scores.len())));
            }
            for (c, s) in batch.iter_mut().zip(scores) {
                c.combined_score = s;
            }
        }
        debug!(candidates = candidates.len(), "candidates re-ranked");
        Ok(())
    }
}
