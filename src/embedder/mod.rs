/// Embedder trait, shared helpers, and batched encoding.
///
/// One model handle serves the whole process (see [`provider`]); callers
/// hand it around as `Arc<dyn Embedder>`.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod provider;
pub mod tokenizer;

use thiserror::Error;
use tracing::debug;

use crate::error::Result;
use crate::progress::{Job, Stage};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow sharing behind `Arc`.
/// Implementations serialize access to their model internally; `embed_batch`
/// is the critical section.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a unit vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple texts, one unit vector per input, order preserved.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Identifier of the model, persisted with every dictionary.
    fn name(&self) -> &str;
}

/// Encode `texts` in batches of `batch_size`, reporting progress per batch.
///
/// Cancellation is checked before each batch; a batch already handed to the
/// embedder runs to completion.
pub fn encode(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
    job: Job<'_>,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let reporter = job.reporter(Stage::Embedding, texts.len());
    let mut vectors = Vec::with_capacity(texts.len());

    for (n, batch) in texts.chunks(batch_size).enumerate() {
        job.cancel.check()?;
        debug!("Encoding batch {} ({} texts)", n + 1, batch.len());
        let embedded = embedder.embed_batch(batch)?;
        if embedded.len() != batch.len() {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {} vectors, model returned {}",
                batch.len(),
                embedded.len()
            ))
            .into());
        }
        let offset = n * batch_size;
        for (i, raw) in embedded.iter().enumerate() {
            let norm_sq: f32 = raw.iter().map(|v| v * v).sum();
            if !norm_sq.is_finite() || norm_sq == 0.0 {
                return Err(EmbedderError::InferenceFailed(format!(
                    "input {} produced a vector that cannot be normalized (squared norm {norm_sq})",
                    offset + i
                ))
                .into());
            }
            vectors.push(l2_normalize(raw));
        }
        reporter.advance(batch.len());
    }
    reporter.finish();

    Ok(vectors)
}

/// L2-normalize a vector, returning the normalized copy.
///
/// Zero vectors are returned unchanged.
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return vec.to_vec();
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    vec.iter().map(|v| v * inv_norm).collect()
}

#[cfg(test)]
mod tests {
    use super::mock::MockEmbedder;
    use super::*;
    use crate::error::EngineError;
    use crate::progress::tests::RecordingSink;
    use crate::progress::{CancelFlag, NoProgress};

    #[test]
    fn test_l2_normalize() {
        let v = vec![3.0, 4.0];
        let normed = l2_normalize(&v);
        let norm: f32 = normed.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normed[0] - 0.6).abs() < 1e-6);
        assert!((normed[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero() {
        let v = vec![0.0, 0.0, 0.0];
        assert_eq!(l2_normalize(&v), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_encode_preserves_order_and_norm() {
        let embedder = MockEmbedder::new(64);
        let texts = ["하나", "둘", "셋", "넷", "다섯"];
        let cancel = CancelFlag::new();
        let job = Job::new(&NoProgress, &cancel, 10);

        let vectors = encode(&embedder, &texts, 2, job).unwrap();
        assert_eq!(vectors.len(), 5);
        for (text, vector) in texts.iter().zip(&vectors) {
            let single = embedder.embed(text).unwrap();
            let dot: f32 = vector.iter().zip(&single).map(|(a, b)| a * b).sum();
            assert!((dot - 1.0).abs() < 1e-4, "batch result differs for {text}");
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_encode_reports_progress() {
        let embedder = MockEmbedder::new(16);
        let texts: Vec<String> = (0..25).map(|i| format!("text {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let sink = RecordingSink::default();
        let cancel = CancelFlag::new();

        encode(&embedder, &refs, 10, Job::new(&sink, &cancel, 10)).unwrap();

        let updates = sink.0.lock().unwrap();
        assert_eq!(updates.last().map(|u| u.done), Some(25));
        assert!(updates.iter().all(|u| u.stage == Stage::Embedding));
    }

    #[test]
    fn test_encode_honors_cancellation() {
        let embedder = MockEmbedder::new(16);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = encode(&embedder, &["a", "b"], 1, Job::new(&NoProgress, &cancel, 10));
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_encode_rejects_zero_vector() {
        let embedder = MockEmbedder::new(16);
        let cancel = CancelFlag::new();
        let result = encode(&embedder, &["a", "b", ""], 2, Job::new(&NoProgress, &cancel, 10));
        match result {
            Err(EngineError::Embedding(EmbedderError::InferenceFailed(msg))) => {
                assert!(msg.contains("input 2"), "{msg}");
            }
            other => panic!("expected inference failure, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_empty_input() {
        let embedder = MockEmbedder::new(16);
        let cancel = CancelFlag::new();
        let vectors = encode(&embedder, &[], 8, Job::new(&NoProgress, &cancel, 10)).unwrap();
        assert!(vectors.is_empty());
    }
}
