//! Deterministic stand-ins for the neural models, used in development and tests.
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use fallos_core::traits::{CrossEncoder, Embedder};

/// Hashes lower-cased whitespace tokens into buckets, then L2-normalizes.
/// Texts sharing tokens end up with positive cosine similarity.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dim as u64) as usize;
            #[allow(clippy::cast_precision_loss)]
            let val = 0.5 + ((h >> 32) as u32 as f32) / (u32::MAX as f32);
            v[idx] += val;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scores a passage by the share of distinct query tokens it contains.
#[derive(Default)]
pub struct OverlapCrossEncoder;

impl CrossEncoder for OverlapCrossEncoder {
    fn score_pairs(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<f32>> {
        let query_tokens: HashSet<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if query_tokens.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }
        Ok(passages
            .iter()
            .map(|p| {
                let passage: HashSet<String> = p.split_whitespace().map(str::to_lowercase).collect();
                #[allow(clippy::cast_precision_loss)]
                let share = query_tokens.intersection(&passage).count() as f32 / query_tokens.len() as f32;
                share
            })
            .collect())
    }
}
