//! Full index builds into a fresh generation.
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use fallos_core::config::Settings;
use fallos_core::corpus::CorpusLoader;
use fallos_core::error::{BuildStage, Error, Result};
use fallos_core::fingerprint::{ChangeDetector, ChangeReport, CorpusFingerprint};
use fallos_core::memory;
use fallos_core::traits::{DenseIndex, DenseStore, Embedder};
use fallos_core::types::{BuildSummary, IndexSizes, ParagraphRecord, Position};
use fallos_embed::EmbeddingBuilder;
use fallos_lexical::{corpus_token_filter, tokenize_filtered, LexicalIndex};

use crate::manifest::{
    collect_garbage, collection_name, generation_dir, list_generations, new_build_id, remove_generation, IndexManifest,
};

/// Builds the dense collection and lexical index for a corpus, then publishes
/// them together as the live generation.
pub struct IndexBuilder<S: DenseStore> {
    settings: Settings,
    store: S,
    embedder: Arc<dyn Embedder>,
    show_progress: bool,
}

impl<S: DenseStore> IndexBuilder<S> {
    pub fn new(settings: Settings, store: S, embedder: Arc<dyn Embedder>) -> Self {
        Self { settings, store, embedder, show_progress: false }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn store(&self) -> &S { &self.store }

    pub fn settings(&self) -> &Settings { &self.settings }

    fn change_detector(&self, corpus_root: &Path) -> ChangeDetector {
        ChangeDetector::in_index_dir(corpus_root, &self.settings.index_dir)
    }

    /// Whether `corpus_root` differs from the corpus of the last successful build.
    pub fn check_changes(&self, corpus_root: &Path) -> Result<ChangeReport> { self.change_detector(corpus_root).compare() }

    /// Build only when the corpus changed since the last successful build.
    pub async fn build_if_changed(&self, corpus_root: &Path) -> Result<Option<BuildSummary>> {
        let report = self.check_changes(corpus_root)?;
        if !report.changed {
            info!(corpus = %corpus_root.display(), "corpus unchanged; build skipped");
            return Ok(None);
        }
        info!(change = %report.description, "corpus changed; rebuilding");
        self.build(corpus_root).await.map(Some)
    }

    /// Incremental updates are not supported; run [`IndexBuilder::build`].
    pub async fn update_incremental(&self, corpus_root: &Path) -> Result<BuildSummary> {
        Err(Error::Unsupported(format!(
            "incremental update of {}; run a full build instead",
            corpus_root.display()
        )))
    }

    /// Full rebuild. Readers keep the previous generation until the new one is
    /// published; a failure at any stage leaves it live and is tagged with that stage.
    pub async fn build(&self, corpus_root: &Path) -> Result<BuildSummary> {
        let started = Instant::now();
        let build_id = new_build_id();
        let index_dir = &self.settings.index_dir;
        info!(corpus = %corpus_root.display(), build_id = %build_id, "index build started");

        // Taken before loading so a file that lands mid-build still reads as a change.
        let fingerprint = CorpusFingerprint::compute(corpus_root);

        let loader = CorpusLoader::new(corpus_root).with_min_paragraph_chars(self.settings.corpus.min_paragraph_chars);
        let (records, stats) = loader.load().map_err(|e| e.at_stage(BuildStage::LoadCorpus))?;
        if records.is_empty() {
            return Err(Error::EmptyCorpus(corpus_root.to_path_buf()).at_stage(BuildStage::LoadCorpus));
        }
        info!(
            paragraphs = records.len(),
            cases = stats.distinct_cases(),
            skipped = stats.documents_skipped,
            short = stats.short_paragraphs,
            "corpus loaded"
        );

        let manifest = match self.build_generation(&build_id, &records).await {
            Ok(m) => m,
            Err(e) => {
                self.discard(&build_id).await;
                return Err(e);
            }
        };
        if let Err(e) = manifest.publish(index_dir) {
            self.discard(&build_id).await;
            return Err(e.at_stage(BuildStage::Publish));
        }

        if let Err(e) = fingerprint.and_then(|f| self.change_detector(corpus_root).record(&f)) {
            warn!(error = %e, "could not record corpus fingerprint");
        }
        if let Err(e) = collect_garbage(
            &self.store,
            index_dir,
            &self.settings.dense.collection,
            &manifest,
            self.settings.dense.retained_generations,
        )
        .await
        {
            warn!(error = %e, "generation cleanup failed");
        }

        let index_sizes = self.sizes(&manifest).await;
        let summary = BuildSummary {
            build_id,
            paragraph_count: records.len(),
            index_sizes,
            duration: started.elapsed(),
            documents_skipped: stats.documents_skipped,
            short_paragraphs: stats.short_paragraphs,
            peak_memory_bytes: memory::peak_resident_bytes(),
        };
        info!(
            build_id = %summary.build_id,
            paragraphs = summary.paragraph_count,
            secs = summary.duration.as_secs_f64(),
            "index build finished"
        );
        Ok(summary)
    }

    async fn build_generation(&self, build_id: &str, records: &[ParagraphRecord]) -> Result<IndexManifest> {
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let dim = self.embedder.dim();

        let vectors = EmbeddingBuilder::new(self.embedder.as_ref(), self.settings.embedding.max_batch_size)
            .with_progress(self.show_progress)
            .embed_all(&texts)
            .map_err(|e| e.at_stage(BuildStage::Embed))?;

        let collection = collection_name(&self.settings.dense.collection, build_id);
        self.upload_dense(&collection, dim, &vectors, records).await.map_err(|e| e.at_stage(BuildStage::DenseIndex))?;
        drop(vectors);

        let filter = corpus_token_filter(texts.len(), &self.settings.lexical);
        if let Some(f) = filter {
            info!(min_len = f.min_len, max_len = f.max_len, "large corpus; filtering lexical tokens");
        }
        let token_lists: Vec<Vec<String>> = texts.iter().map(|t| tokenize_filtered(t, filter)).collect();
        let lexical_dir = generation_dir(build_id);
        LexicalIndex::build(&self.settings.index_dir.join(&lexical_dir), &token_lists, &texts)
            .map_err(|e| e.at_stage(BuildStage::LexicalIndex))?;

        Ok(IndexManifest {
            build_id: build_id.to_string(),
            collection,
            lexical_dir,
            paragraph_count: records.len(),
            dimension: dim,
            token_filter: filter,
            created_at: chrono::Utc::now(),
        })
    }

    async fn upload_dense(&self, name: &str, dim: usize, vectors: &[Vec<f32>], records: &[ParagraphRecord]) -> Result<()> {
        let collection = self.store.open_collection(name).await?;
        collection.rebuild(dim).await?;
        let ids: Vec<Position> = (0..records.len() as Position).collect();
        collection.upload(&ids, vectors, records, self.settings.dense.upload_batch_size).await?;
        collection.finalize().await?;
        let stored = collection.count().await?;
        if stored != records.len() {
            return Err(Error::RemoteStore(format!("collection {name} holds {stored} points, expected {}", records.len())));
        }
        Ok(())
    }

    async fn discard(&self, build_id: &str) {
        if let Err(e) = remove_generation(&self.store, &self.settings.index_dir, &self.settings.dense.collection, build_id).await {
            warn!(build_id, error = %e, "could not remove artifacts of failed build");
        }
    }

    async fn sizes(&self, manifest: &IndexManifest) -> IndexSizes {
        let (lexical_bytes, text_array_bytes) = LexicalIndex::open(&manifest.lexical_path(&self.settings.index_dir))
            .map(|l| l.size_on_disk())
            .unwrap_or_default();
        let dense_bytes = self.store.collection_size(&manifest.collection).await.ok().flatten();
        IndexSizes { lexical_bytes, text_array_bytes, dense_bytes }
    }
}

/// What is currently published under an index directory.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub index_dir: PathBuf,
    pub live: Option<IndexManifest>,
    pub generations: Vec<String>,
    pub dense_points: Option<usize>,
    pub sizes: Option<IndexSizes>,
}

pub async fn index_status<S: DenseStore>(settings: &Settings, store: &S) -> Result<IndexStatus> {
    let index_dir = settings.index_dir.clone();
    let live = IndexManifest::load_optional(&index_dir)?;
    let generations = list_generations(&index_dir)?;
    let (dense_points, sizes) = match &live {
        None => (None, None),
        Some(m) => {
            let points = match store.open_collection(&m.collection).await {
                Ok(c) => c.count().await.ok(),
                Err(_) => None,
            };
            let (lexical_bytes, text_array_bytes) =
                LexicalIndex::open(&m.lexical_path(&index_dir)).map(|l| l.size_on_disk()).unwrap_or_default();
            let dense_bytes = store.collection_size(&m.collection).await.ok().flatten();
            (points, Some(IndexSizes { lexical_bytes, text_array_bytes, dense_bytes }))
        }
    };
    Ok(IndexStatus { index_dir, live, generations, dense_points, sizes })
}
