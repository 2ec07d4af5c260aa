use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use ort::session::{builder::GraphOptimizationLevel, Session};

use crate::embedding::EmbeddingError;

const INTRA_THREADS: usize = 4;

/// Builds an inference session for the model file at `model_path`. Relative paths are resolved
/// against the model resource directory.
pub fn create_session(model_path: &Utf8Path) -> Result<Session, EmbeddingError> {
    let full_path = resolve_model_path(model_path);
    debug!("Creating inference session for model at path: {}", full_path);

    let init_error = |e: ort::Error| EmbeddingError::Initialization {
        model: full_path.to_string(),
        source: e.into(),
    };

    Session::builder()
        .map_err(init_error)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(init_error)?
        .with_intra_threads(INTRA_THREADS)
        .map_err(init_error)?
        .commit_from_file(&full_path)
        .map_err(init_error)
}

pub fn resolve_model_path(model_path: &Utf8Path) -> Utf8PathBuf {
    if model_path.is_absolute() {
        model_path.to_path_buf()
    } else {
        get_base_resource_dir().join(model_path)
    }
}

/// Static variable for the base resource (model files) directory
/// Defaults to "models" if not explicitly set
static BASE_RESOURCE_DIRECTORY: OnceLock<Utf8PathBuf> = OnceLock::new();

/// Set the base resource directory. If the base resource directory has already been
/// set or a model has already been loaded, this will be ignored.
pub fn init_model_resource_directory(path: &Utf8Path) {
    BASE_RESOURCE_DIRECTORY.set(path.to_path_buf()).unwrap_or_else(|_| {
        warn!("Attempting to change previously resolved base model resource directory, ignoring");
    });
}

/// Get the base resource directory, defaulting to "models"
pub(crate) fn get_base_resource_dir() -> Utf8PathBuf {
    BASE_RESOURCE_DIRECTORY
        .get_or_init(|| Utf8PathBuf::from("models"))
        .clone()
}
