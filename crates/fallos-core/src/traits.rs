use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DenseHit, ParagraphRecord, Position};

/// Sentence embedder producing fixed-dimension, L2-normalized vectors.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Pairwise relevance model. Returns one score per passage, higher is better.
pub trait CrossEncoder: Send + Sync {
    fn score_pairs(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// One named collection of `(position, vector, payload)` points scored by cosine similarity.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Drop and recreate the collection with the given vector dimension.
    async fn rebuild(&self, dimension: usize) -> Result<()>;

    /// Upsert points in batches of `batch_size`. A failed batch aborts the upload.
    async fn upload(
        &self,
        ids: &[Position],
        vectors: &[Vec<f32>],
        payloads: &[ParagraphRecord],
        batch_size: usize,
    ) -> Result<()>;

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<DenseHit>>;

    /// Payload lookup by id; unknown ids are absent from the result.
    async fn fetch(&self, ids: &[Position]) -> Result<Vec<(Position, ParagraphRecord)>>;

    async fn count(&self) -> Result<usize>;

    /// Post-upload housekeeping such as ANN index training.
    async fn finalize(&self) -> Result<()> { Ok(()) }
}

/// A vector store hosting named collections.
#[async_trait]
pub trait DenseStore: Send + Sync {
    type Collection: DenseIndex + 'static;

    async fn open_collection(&self, name: &str) -> Result<Self::Collection>;
    async fn drop_collection(&self, name: &str) -> Result<()>;
    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Bytes on local disk used by `name`, when the store can tell.
    async fn collection_size(&self, _name: &str) -> Result<Option<u64>> { Ok(None) }
}
