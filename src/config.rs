/// Configuration for locmatch.
///
/// Handles loading, validating, and providing default configuration values.
/// Every field has a default, so a partial JSON file is always valid.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "locmatch.json";

// ── Default value functions ──────────────────────────────────────────

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("locmatch").join("dictionaries"))
        .unwrap_or_else(|| PathBuf::from("./dictionaries"))
        .to_string_lossy()
        .into_owned()
}

fn default_model_name() -> String {
    "multilingual-e5-small".to_string()
}

fn default_model_repo() -> String {
    "intfloat/multilingual-e5-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_text_prefix() -> String {
    "query: ".to_string()
}

fn default_max_tokens() -> usize {
    512
}

fn default_intra_threads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.85
}

fn default_top_k() -> usize {
    5
}

fn default_batch_size() -> usize {
    64
}

fn default_cluster_threshold() -> f32 {
    0.9
}

fn default_cluster_k() -> usize {
    100
}

fn default_progress_interval() -> usize {
    10
}

fn default_target_column() -> usize {
    1
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory holding dictionary artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub columns: ColumnConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    /// HuggingFace repository the model is fetched from.
    #[serde(default = "default_model_repo")]
    pub repo: String,

    /// Local model directory; defaults to `models/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Prepended to every text before tokenization (e5 models expect one).
    #[serde(default = "default_text_prefix")]
    pub text_prefix: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_true")]
    pub allow_download: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_cluster_threshold")]
    pub cluster_threshold: f32,

    /// Neighbors examined per entry when building the similarity graph.
    #[serde(default = "default_cluster_k")]
    pub cluster_k: usize,

    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

/// Zero-based column positions of source and target text.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ColumnConfig {
    #[serde(default)]
    pub source: usize,

    #[serde(default = "default_target_column")]
    pub target: usize,

    #[serde(default)]
    pub has_header: bool,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model: ModelConfig::default(),
            matching: MatchingConfig::default(),
            columns: ColumnConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            repo: default_model_repo(),
            dir: None,
            dimensions: default_dimensions(),
            text_prefix: default_text_prefix(),
            max_tokens: default_max_tokens(),
            intra_threads: default_intra_threads(),
            allow_download: default_true(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            top_k: default_top_k(),
            batch_size: default_batch_size(),
            cluster_threshold: default_cluster_threshold(),
            cluster_k: default_cluster_k(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            source: 0,
            target: default_target_column(),
            has_header: false,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl ModelConfig {
    /// Directory the model files live in.
    #[must_use]
    pub fn resolved_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("models").join(&self.name),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to [`DEFAULT_CONFIG_PATH`].
    /// A missing file yields the defaults (and writes a template when the
    /// default path was used); unparsable JSON is reported and ignored.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_PATH {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        anyhow::ensure!(
            (0.0..=1.0).contains(&m.threshold),
            "matching.threshold must be within [0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&m.cluster_threshold),
            "matching.cluster_threshold must be within [0, 1]"
        );
        anyhow::ensure!(m.top_k > 0, "matching.top_k must be positive");
        anyhow::ensure!(m.batch_size > 0, "matching.batch_size must be positive");
        anyhow::ensure!(m.cluster_k > 0, "matching.cluster_k must be positive");
        anyhow::ensure!(
            m.progress_interval > 0,
            "matching.progress_interval must be positive"
        );
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            self.columns.source != self.columns.target,
            "columns.source and columns.target must differ"
        );
        anyhow::ensure!(!self.data_dir.is_empty(), "data_dir must be set");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
