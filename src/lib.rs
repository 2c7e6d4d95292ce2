//! # locmatch - translation matching for localization data
//!
//! Builds semantic dictionaries from bilingual (source, target) pairs
//! harvested from game-localization exports, then answers two questions:
//! what translation already exists for a near-identical source string, and
//! which source strings are duplicates of each other.
//!
//! ## Architecture
//!
//! - **[`normalize`]**: Text cleaning and reversible code-token extraction
//! - **[`embedder`]**: Sentence embeddings via ONNX Runtime (multilingual-e5-small)
//! - **[`dictionary`]**: Split/whole pools, canonical selection, ingestion, persistence
//! - **[`matcher`]**: Exact similarity index, query resolution, clustering
//! - **[`engine`]**: The operations exposed to callers
//! - **[`config`]**: JSON configuration loading and validation
//! - **[`progress`]**: Progress sinks and cancellation for bulk jobs

pub mod config;
pub mod dictionary;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod normalize;
pub mod progress;

pub use engine::{ClusterReport, Engine, Summary, TranslateReport};
pub use error::{EngineError, Result};
