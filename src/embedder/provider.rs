/// Process-wide embedding model handle.
///
/// The model is loaded on first use and shared afterwards. Concurrent first
/// callers block on the same initialization instead of loading twice; a
/// failed load leaves the cell empty so a later call can retry.
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use super::download::{all_files_present, download_model_files};
use super::onnx::OnnxEmbedder;
use super::{Embedder, EmbedderError};
use crate::config::ModelConfig;

static SHARED: OnceCell<Arc<dyn Embedder>> = OnceCell::new();

/// Return the shared model, loading it on the first call.
///
/// Later calls ignore `config` and hand out the already-loaded model.
pub fn load(config: &ModelConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    SHARED
        .get_or_try_init(|| load_onnx(config).map(|e| Arc::new(e) as Arc<dyn Embedder>))
        .map(Arc::clone)
}

/// Whether the shared model has been loaded in this process.
#[must_use]
pub fn is_loaded() -> bool {
    SHARED.get().is_some()
}

fn load_onnx(config: &ModelConfig) -> Result<OnnxEmbedder, EmbedderError> {
    let model_dir: PathBuf = config.resolved_dir();

    if !all_files_present(&model_dir) {
        if !config.allow_download {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model files missing in {} and downloads are disabled",
                model_dir.display()
            )));
        }
        if let Err(e) = download_model_files(&model_dir, &config.repo) {
            warn!("Model download failed: {e:#}");
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model {} not found locally and download failed: {e:#}",
                config.repo
            )));
        }
    }

    info!("Loading embedding model from {}", model_dir.display());
    OnnxEmbedder::new(&model_dir, config)
}
