//! Memory-aware batch embedding of a full paragraph sequence.
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::{debug, info};

use fallos_core::error::{Error, Result};
use fallos_core::memory;
use fallos_core::traits::Embedder;

/// Smallest batch used when memory is scarce.
pub const MIN_BATCH_SIZE: usize = 8;
/// Batch slots granted per GiB of available memory.
pub const BATCHES_PER_GIB: f64 = 8.0;

/// `min(max_batch, max(8, available_gib * 8))`; `max_batch` when memory is unknown.
pub fn effective_batch_size(max_batch: usize, available_gib: Option<f64>) -> usize {
    let max_batch = max_batch.max(1);
    match available_gib {
        Some(gib) if gib.is_finite() && gib >= 0.0 => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let by_memory = (gib * BATCHES_PER_GIB) as usize;
            max_batch.min(by_memory.max(MIN_BATCH_SIZE))
        }
        _ => max_batch,
    }
}

pub struct EmbeddingBuilder<'a> {
    embedder: &'a dyn Embedder,
    max_batch_size: usize,
    show_progress: bool,
}

impl<'a> EmbeddingBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder, max_batch_size: usize) -> Self {
        Self { embedder, max_batch_size, show_progress: false }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn batch_size(&self) -> usize { effective_batch_size(self.max_batch_size, memory::available_gib()) }

    /// One vector per input, in input order. Only the batch in flight is copied.
    pub fn embed_all<T: AsRef<str>>(&self, texts: &[T]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.batch_size();
        let dim = self.embedder.dim();
        info!(paragraphs = texts.len(), batch_size, dim, "embedding corpus");

        let pb = if self.show_progress { ProgressBar::new(texts.len() as u64) } else { ProgressBar::hidden() };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} paragraphs ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let started = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for (i, chunk) in texts.chunks(batch_size).enumerate() {
            let batch: Vec<String> = chunk.iter().map(|t| t.as_ref().to_owned()).collect();
            let vectors = self
                .embedder
                .embed_batch(&batch)
                .map_err(|e| Error::Embedding(format!("batch {i}: {e}")))?;
            if vectors.len() != chunk.len() {
                return Err(Error::Embedding(format!(
                    "batch {i}: expected {} vectors, got {}",
                    chunk.len(),
                    vectors.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                return Err(Error::Embedding(format!("batch {i}: vector of dimension {} (expected {dim})", bad.len())));
            }
            out.extend(vectors);
            pb.inc(chunk.len() as u64);
            debug!(batch = i, done = out.len(), "embedded batch");
        }
        pb.finish_and_clear();
        info!(paragraphs = out.len(), elapsed_ms = started.elapsed().as_millis(), "embedding finished");
        Ok(out)
    }
}
