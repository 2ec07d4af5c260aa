use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use ort::execution_providers::*;

pub use crate::embedding::sessions::init_model_resource_directory;

#[cfg(windows)]
const ONNX_RUNTIME_LIBRARY: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
const ONNX_RUNTIME_LIBRARY: &str = "libonnxruntime.dylib";
#[cfg(all(not(windows), not(target_os = "macos")))]
const ONNX_RUNTIME_LIBRARY: &str = "libonnxruntime.so";

#[derive(thiserror::Error, Debug)]
pub enum EnvironmentError {
    #[error("Failed to initialize ONNX Runtime from {location}")]
    Runtime { location: String, #[source] source: ort::Error },
}

/// Sets up ONNX Runtime once per process. With `onnx_lib_dir` the runtime library is loaded
/// from that directory, otherwise from the default search paths. CUDA is tried first when the
/// `cuda` feature is enabled; the CPU provider is always registered.
pub fn init_ort(onnx_lib_dir: Option<&Utf8Path>) -> Result<(), EnvironmentError> {
    let mut execution_providers = vec![];
    #[cfg(feature = "cuda")]
    execution_providers.push(CUDAExecutionProvider::default().build().error_on_failure());
    execution_providers.push(CPUExecutionProvider::default().build());

    let library = onnx_lib_dir.map(runtime_library_path);
    let builder = match &library {
        Some(path) => ort::init_from(path),
        None => ort::init(),
    };
    builder.with_execution_providers(execution_providers)
        .commit()
        .map_err(|e| EnvironmentError::Runtime {
            location: library.as_ref().map_or_else(|| "default search paths".to_owned(), Utf8PathBuf::to_string),
            source: e,
        })?;

    info!("ONNX Runtime initialized");
    Ok(())
}

/// Points model loading at `base_model_dir`, if given. Must run before the first model is loaded.
pub fn init_embedding(base_model_dir: Option<&Utf8Path>) {
    if let Some(dir) = base_model_dir {
        init_model_resource_directory(dir);
    }
}

fn runtime_library_path(lib_dir: &Utf8Path) -> Utf8PathBuf {
    lib_dir.join(ONNX_RUNTIME_LIBRARY)
}
