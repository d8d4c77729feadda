use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{Encoding, Tokenizer, TruncationParams, TruncationStrategy};

/// Padded model inputs for one batch, all shaped `[B, T]` with `T` the longest sequence.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub type_ids: Tensor,
    pub attention_mask: Tensor,
}

/// Truncate single texts and pairs to `max_len` tokens (longest side first for pairs).
pub fn configure_truncation(tokenizer: &mut Tokenizer, max_len: usize) -> Result<()> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_len,
            strategy: TruncationStrategy::LongestFirst,
            ..Default::default()
        }))
        .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
    tokenizer.with_padding(None);
    Ok(())
}

pub fn pad_id(tokenizer: &Tokenizer) -> u32 {
    tokenizer
        .get_padding()
        .map(|p| p.pad_id)
        .or_else(|| tokenizer.token_to_id("[PAD]"))
        .unwrap_or(0)
}

pub fn encode_batch(tokenizer: &Tokenizer, texts: &[String], device: &Device) -> Result<EncodedBatch> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    pad_encodings(&encodings, pad_id(tokenizer), device)
}

/// Encode `(query, passage)` pairs as `[CLS] query [SEP] passage [SEP]`.
pub fn encode_pairs(tokenizer: &Tokenizer, query: &str, passages: &[String], device: &Device) -> Result<EncodedBatch> {
    let inputs: Vec<(String, String)> = passages.iter().map(|p| (query.to_string(), p.clone())).collect();
    let encodings = tokenizer
        .encode_batch(inputs, true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    pad_encodings(&encodings, pad_id(tokenizer), device)
}

fn pad_encodings(encodings: &[Encoding], pad_id: u32, device: &Device) -> Result<EncodedBatch> {
    let batch = encodings.len();
    let max_len = encodings.iter().map(Encoding::len).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(batch * max_len);
    let mut types = Vec::with_capacity(batch * max_len);
    let mut mask = Vec::with_capacity(batch * max_len);
    for enc in encodings {
        let pad = max_len - enc.len();
        ids.extend_from_slice(enc.get_ids());
        ids.extend(std::iter::repeat(pad_id).take(pad));
        types.extend_from_slice(enc.get_type_ids());
        types.extend(std::iter::repeat(0).take(pad));
        mask.extend_from_slice(enc.get_attention_mask());
        mask.extend(std::iter::repeat(0).take(pad));
    }
    Ok(EncodedBatch {
        input_ids: Tensor::from_vec(ids, (batch, max_len), device)?,
        type_ids: Tensor::from_vec(types, (batch, max_len), device)?,
        attention_mask: Tensor::from_vec(mask, (batch, max_len), device)?,
    })
}
