//! BERT-family models loaded from a local Hugging Face snapshot directory
//! (`config.json`, `tokenizer.json`, `model.safetensors` or `pytorch_model.bin`).
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use fallos_core::traits::{CrossEncoder, Embedder};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::{configure_truncation, encode_batch, encode_pairs};

#[derive(Deserialize)]
struct HiddenSize {
    hidden_size: usize,
}

struct LoadedBert {
    config: BertConfig,
    hidden_size: usize,
    tokenizer: Tokenizer,
    vb: VarBuilder<'static>,
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        debug!(path = %safetensors.display(), "loading safetensors weights");
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    debug!(path = %pickle.display(), "loading pytorch weights");
    let weights = candle_core::pickle::read_all(&pickle)
        .with_context(|| format!("no model weights found in {}", model_dir.display()))?;
    weights
        .into_iter()
        .map(|(name, t)| Ok((name, t.to_device(device)?)))
        .collect()
}

fn load_bert(model_dir: &Path, max_len: usize, device: &Device) -> Result<LoadedBert> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
    configure_truncation(&mut tokenizer, max_len)?;

    let config_path = model_dir.join("config.json");
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config: BertConfig = serde_json::from_str(&raw)?;
    let HiddenSize { hidden_size } = serde_json::from_str(&raw)?;

    let weights = load_weights(model_dir, device)?;
    let vb = VarBuilder::from_tensors(weights, DType::F32, device);
    Ok(LoadedBert { config, hidden_size, tokenizer, vb })
}

/// Sentence embedder: BERT encoder + masked mean pooling + L2 normalization.
pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
}

impl SentenceEmbedder {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        let started = Instant::now();
        let LoadedBert { config, hidden_size, tokenizer, vb } = load_bert(model_dir, max_len, &device)?;
        let model = BertModel::load(vb, &config)?;
        info!(model = %model_dir.display(), dim = hidden_size, elapsed_ms = started.elapsed().as_millis(), "embedding model loaded");
        Ok(Self { model, tokenizer, device, dim: hidden_size, max_len })
    }
}

impl Embedder for SentenceEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch = encode_batch(&self.tokenizer, texts, &self.device)?;
        let hidden = self.model.forward(&batch.input_ids, &batch.type_ids, Some(&batch.attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &batch.attention_mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}

/// Sequence-classification cross-encoder: `[CLS]` -> pooler (tanh) -> one-logit head.
pub struct BertCrossEncoder {
    model: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

impl BertCrossEncoder {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        let LoadedBert { config, hidden_size, tokenizer, vb } = load_bert(model_dir, max_len, &device)?;
        let model = BertModel::load(vb.pp("bert"), &config)?;
        let pooler = linear(hidden_size, hidden_size, vb.pp("bert.pooler.dense"))?;
        let classifier = linear(hidden_size, 1, vb.pp("classifier"))?;
        info!(model = %model_dir.display(), "cross-encoder loaded");
        Ok(Self { model, pooler, classifier, tokenizer, device })
    }
}

impl CrossEncoder for BertCrossEncoder {
    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let batch = encode_pairs(&self.tokenizer, query, passages, &self.device)?;
        let hidden = self.model.forward(&batch.input_ids, &batch.type_ids, Some(&batch.attention_mask))?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?.squeeze(1)?;
        Ok(logits.to_device(&Device::Cpu)?.to_vec1::<f32>()?)
    }
}
