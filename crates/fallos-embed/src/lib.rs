//! fallos-embed
//!
//! Candle-based sentence embedder and cross-encoder, their deterministic fakes,
//! and the memory-aware batch embedding used by index builds.
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use fallos_core::config::{EmbeddingSettings, RerankerSettings};
use fallos_core::traits::{CrossEncoder, Embedder};

pub mod batching;
pub mod device;
pub mod fake;
pub mod model;
pub mod pool;
pub mod tokenize;

pub use batching::{effective_batch_size, EmbeddingBuilder};
pub use fake::{HashEmbedder, OverlapCrossEncoder};
pub use model::{BertCrossEncoder, SentenceEmbedder};
pub use pool::masked_mean_l2;

pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_RERANKER_MODEL: &str = "ms-marco-MiniLM-L-6-v2";

/// True when `FALLOS_USE_FAKE_MODELS` is `1`/`true`.
pub fn fake_models_requested() -> bool {
    std::env::var("FALLOS_USE_FAKE_MODELS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

pub fn load_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if settings.use_fake || fake_models_requested() {
        info!(dim = settings.dimension, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dimension)));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref(), DEFAULT_EMBEDDING_MODEL)?;
    let embedder = SentenceEmbedder::load(&dir, settings.max_seq_len)?;
    if embedder.dim() != settings.dimension {
        return Err(anyhow!(
            "model at {} produces {}-dim vectors but embedding.dimension is {}",
            dir.display(),
            embedder.dim(),
            settings.dimension
        ));
    }
    Ok(Arc::new(embedder))
}

pub fn load_cross_encoder(settings: &RerankerSettings, use_fake: bool) -> Result<Arc<dyn CrossEncoder>> {
    if use_fake || fake_models_requested() {
        info!("using overlap cross-encoder");
        return Ok(Arc::new(OverlapCrossEncoder));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref(), DEFAULT_RERANKER_MODEL)?;
    Ok(Arc::new(BertCrossEncoder::load(&dir, settings.max_seq_len)?))
}

/// Configured directory, else `models/<name>` or `../models/<name>`.
pub fn resolve_model_dir(configured: Option<&Path>, name: &str) -> Result<PathBuf> {
    if let Some(dir) = configured {
        if dir.exists() {
            return Ok(dir.to_path_buf());
        }
        return Err(anyhow!("model directory {} does not exist", dir.display()));
    }
    [Path::new("models").join(name), Path::new("../models").join(name)]
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Could not locate model directory for {name}"))
}
