/// Sentence-piece / BERT tokenizer wrapper around HuggingFace `tokenizers`.
///
/// Produces padded, row-major batches ready to be wrapped in ONNX tensors.
use std::path::Path;

use anyhow::Result;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Wrapper around the HuggingFace tokenizer.
pub struct BatchTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

/// A tokenized batch, flattened to `[batch, seq_len]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEncoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub batch: usize,
    pub seq_len: usize,
}

impl BatchEncoding {
    /// Attention mask of row `i`.
    #[must_use]
    pub fn mask_row(&self, i: usize) -> &[i64] {
        &self.attention_mask[i * self.seq_len..(i + 1) * self.seq_len]
    }
}

impl BatchTokenizer {
    /// Load `tokenizer.json` from the model directory, truncating inputs to
    /// `max_length` tokens and padding each batch to its longest member.
    pub fn from_model_dir(model_dir: &Path, max_length: usize) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to configure truncation: {e}"))?;

        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self { inner, max_length })
    }

    /// Tokenize a batch of texts into one padded matrix.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<BatchEncoding> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("failed to encode batch: {e}"))?;

        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch = encodings.len();
        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);

        for enc in &encodings {
            let ids = enc.get_ids();
            input_ids.extend(ids.iter().map(|&id| id as i64));
            attention_mask.extend(enc.get_attention_mask().iter().map(|&m| m as i64));
            // BatchLongest already pads; this only guards odd tokenizer configs
            let pad = seq_len - ids.len();
            input_ids.extend(std::iter::repeat_n(0, pad));
            attention_mask.extend(std::iter::repeat_n(0, pad));
        }

        Ok(BatchEncoding {
            input_ids,
            attention_mask,
            batch,
            seq_len,
        })
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Requires the downloaded tokenizer.json.
    /// Run with: cargo test tokenizer -- --ignored
    #[test]
    #[ignore]
    fn test_encode_batch_with_real_model() {
        let model_dir = Path::new("models/multilingual-e5-small");
        if !model_dir.join("tokenizer.json").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let tokenizer = BatchTokenizer::from_model_dir(model_dir, 128).unwrap();
        let batch = tokenizer
            .encode_batch(&["안녕", "아이템을 획득했습니다", "Hello"])
            .unwrap();

        assert_eq!(batch.batch, 3);
        assert_eq!(batch.input_ids.len(), 3 * batch.seq_len);
        assert_eq!(batch.attention_mask.len(), batch.input_ids.len());
        assert!(batch.mask_row(1).iter().all(|&m| m == 1));
    }

    #[test]
    fn test_mask_row_slicing() {
        let batch = BatchEncoding {
            input_ids: vec![1, 2, 0, 3, 4, 5],
            attention_mask: vec![1, 1, 0, 1, 1, 1],
            batch: 2,
            seq_len: 3,
        };
        assert_eq!(batch.mask_row(0), &[1, 1, 0]);
        assert_eq!(batch.mask_row(1), &[1, 1, 1]);
    }

    #[test]
    fn test_tokenizer_missing_file() {
        let result = BatchTokenizer::from_model_dir(Path::new("/nonexistent/path"), 512);
        assert!(result.is_err());
    }
}
