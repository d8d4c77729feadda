//! Command implementations shared by the `fallos` and `fallos-indexer` binaries.
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fallos_core::fingerprint::{ChangeDetector, ChangeReport};
use fallos_core::traits::CrossEncoder;
use fallos_core::types::{BuildSummary, SearchHit};
use fallos_core::Settings;
use fallos_dense::LanceStore;
use fallos_embed::{load_cross_encoder, load_embedder};
use fallos_hybrid::{index_status, HybridQueryEngine, IndexBuilder, IndexStatus};

/// Log to stderr, filtered by `RUST_LOG` (default `info`, `debug` with `verbose`).
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).try_init();
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    Settings::load_from(config_dir).with_context(|| format!("loading settings from {}", config_dir.display()))
}

pub async fn open_store(settings: &Settings, show_progress: bool) -> Result<LanceStore> {
    let store = LanceStore::from_settings(&settings.dense)
        .await
        .with_context(|| format!("connecting to dense store at {}", settings.dense.uri))?;
    Ok(store.with_progress(show_progress))
}

/// Full build of `corpus` (default: `settings.corpus_dir`). With `if_changed`,
/// returns `None` without building when the corpus fingerprint is unchanged.
pub async fn build(settings: &Settings, corpus: Option<&Path>, if_changed: bool, show_progress: bool) -> Result<Option<BuildSummary>> {
    let corpus = corpus.map_or_else(|| settings.corpus_dir.clone(), Path::to_path_buf);
    let embedder = load_embedder(&settings.embedding).context("loading embedding model")?;
    let store = open_store(settings, show_progress).await?;
    let builder = IndexBuilder::new(settings.clone(), store, embedder).with_progress(show_progress);
    let summary = if if_changed { builder.build_if_changed(&corpus).await? } else { Some(builder.build(&corpus).await?) };
    Ok(summary)
}

/// Answer `question` against the live generation. `rerank` overrides `search.enable_reranking`.
pub async fn query(settings: &Settings, question: &str, top_n: Option<usize>, rerank: Option<bool>) -> Result<Vec<SearchHit>> {
    let mut settings = settings.clone();
    if let Some(rerank) = rerank {
        settings.search.enable_reranking = rerank;
    }
    let embedder = load_embedder(&settings.embedding).context("loading embedding model")?;
    let reranker: Option<Arc<dyn CrossEncoder>> = if settings.search.enable_reranking && settings.search.strategy.uses_lexical() {
        Some(load_cross_encoder(&settings.reranker, settings.embedding.use_fake).context("loading cross-encoder")?)
    } else {
        None
    };
    let store = open_store(&settings, false).await?;
    let engine = HybridQueryEngine::open(&settings, &store, embedder, reranker).await?;
    Ok(engine.query(question, top_n.unwrap_or(settings.search.default_top_n)).await?)
}

/// Compare `corpus` with the fingerprint of the last successful build. Nothing is persisted.
pub fn check(settings: &Settings, corpus: Option<&Path>) -> Result<ChangeReport> {
    let corpus: PathBuf = corpus.map_or_else(|| settings.corpus_dir.clone(), Path::to_path_buf);
    Ok(ChangeDetector::in_index_dir(corpus, &settings.index_dir).compare()?)
}

pub async fn status(settings: &Settings) -> Result<IndexStatus> {
    let store = open_store(settings, false).await?;
    Ok(index_status(settings, &store).await?)
}

pub fn render_summary(summary: &BuildSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "build {}", summary.build_id);
    let _ = writeln!(out, "  paragraphs:        {}", summary.paragraph_count);
    let _ = writeln!(out, "  documents skipped: {}", summary.documents_skipped);
    let _ = writeln!(out, "  short paragraphs:  {}", summary.short_paragraphs);
    let _ = writeln!(out, "  lexical index:     {} bytes", summary.index_sizes.lexical_bytes);
    let _ = writeln!(out, "  text array:        {} bytes", summary.index_sizes.text_array_bytes);
    if let Some(bytes) = summary.index_sizes.dense_bytes {
        let _ = writeln!(out, "  dense collection:  {bytes} bytes");
    }
    if let Some(bytes) = summary.peak_memory_bytes {
        let _ = writeln!(out, "  peak memory:       {:.1} MiB", bytes as f64 / (1024.0 * 1024.0));
    }
    let _ = write!(out, "  duration:          {:.2}s", summary.duration.as_secs_f64());
    out
}

pub fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "no results".to_string();
    }
    let mut out = String::new();
    for (i, h) in hits.iter().enumerate() {
        let _ = writeln!(out, "{}. [{:.4}] {} / {} #{} ({})", i + 1, h.score, h.case_id, h.section, h.paragraph_index, h.search_type);
        let _ = writeln!(out, "   {}", h.source_path);
        if let Some(idea) = &h.central_idea {
            let _ = writeln!(out, "   idea: {idea}");
        }
        let _ = writeln!(out, "   {}", h.paragraph_text);
    }
    out.trim_end().to_string()
}

pub fn render_status(status: &IndexStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "index dir: {}", status.index_dir.display());
    match &status.live {
        None => {
            let _ = write!(out, "no published index");
            return out;
        }
        Some(m) => {
            let _ = writeln!(out, "live build: {} ({})", m.build_id, m.created_at.to_rfc3339());
            let _ = writeln!(out, "collection: {}", m.collection);
            let _ = writeln!(out, "paragraphs: {}", m.paragraph_count);
            if let Some(points) = status.dense_points {
                let _ = writeln!(out, "dense points: {points}");
            }
        }
    }
    if let Some(sizes) = &status.sizes {
        let _ = writeln!(out, "lexical: {} bytes, texts: {} bytes", sizes.lexical_bytes, sizes.text_array_bytes);
    }
    let _ = write!(out, "generations on disk: {}", status.generations.join(", "));
    out
}
