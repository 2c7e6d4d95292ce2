//! Crate-wide error kinds.
//!
//! Per-row problems during bulk jobs are counted and skipped by the callers;
//! everything that reaches this enum aborts the operation it came from.
use std::path::PathBuf;

use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::matcher::index::IndexError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("corrupt dictionary at {}: {reason}", path.display())]
    CorruptDictionary { path: PathBuf, reason: String },

    #[error("dictionary not found: {0}")]
    DictionaryNotFound(String),

    #[error("dictionary was built with model {stored}, current model is {current}")]
    ModelMismatch { stored: String, current: String },

    #[error("threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f32),

    #[error("index built from generation {index} but pool is at generation {pool}")]
    StaleIndex { index: u64, pool: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("embedding failed: {0}")]
    Embedding(EmbedderError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EmbedderError> for EngineError {
    fn from(err: EmbedderError) -> Self {
        match err {
            EmbedderError::ModelLoadFailed(msg) => EngineError::ModelUnavailable(msg),
            other => EngineError::Embedding(other),
        }
    }
}

impl EngineError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EngineError::CorruptDictionary {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// A similarity threshold validated to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Result<Self> {
        if value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Err(EngineError::ThresholdOutOfRange(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }

    #[must_use]
    pub fn accepts(self, score: f32) -> bool {
        score >= self.0
    }
}
