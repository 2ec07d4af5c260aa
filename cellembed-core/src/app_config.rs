use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError, Environment, File, FileFormat};
use log::debug;
use serde::Deserialize;

const APP_DIRECTORY_NAME: &str = "cellembed";
const CONFIG_FILE_NAME: &str = "pipeline.toml";
const ENV_PREFIX: &str = "CELLEMBED";
const APP_DATA_PLACEHOLDER: &str = "%%AppDataDirectory%%";
const DEFAULT_PIPELINE_CONFIG: &str = include_str!("../artifacts/defaults/pipeline.toml");

/// Settings for an embedding run. Command line flags take precedence over these.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    pub model_directory: Utf8PathBuf,
    pub model_file: Utf8PathBuf,
    pub model_input: String,
    pub model_output: String,
    pub batch_size: usize,
    #[serde(default)]
    pub max_images: Option<usize>,
    pub image_size: u32,
    pub output_directory: Utf8PathBuf,
    #[serde(default)]
    pub author: String,
}

/// Loads the pipeline configuration from the application data directory.
///
/// The user's `pipeline.toml` is created from the bundled defaults if it does not exist yet.
/// `CELLEMBED_*` environment variables override values from the file, and
/// `%%AppDataDirectory%%` placeholders are replaced with the application data directory path.
pub fn get_pipeline_config() -> Result<PipelineConfig, ConfigError> {
    let app_folder = get_app_folder()?;
    let config_file_path = app_folder.join(CONFIG_FILE_NAME);
    if !config_file_path.exists() {
        // If the pipeline.toml file does not exist, create it with default values
        fs::write(&config_file_path, DEFAULT_PIPELINE_CONFIG)
            .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    }

    load_pipeline_config(Some(&config_file_path), &app_folder)
}

/// Layers bundled defaults, the optional `user_file` and the environment, expanding
/// placeholders against `app_folder`.
pub fn load_pipeline_config(user_file: Option<&Utf8Path>, app_folder: &Utf8Path) -> Result<PipelineConfig, ConfigError> {
    let mut builder = Config::builder()
        .add_source(File::from_str(DEFAULT_PIPELINE_CONFIG, FileFormat::Toml));
    if let Some(path) = user_file {
        debug!("Loading pipeline config from {}", path);
        builder = builder.add_source(File::with_name(path.as_str()).required(false));
    }

    let mut config: PipelineConfig = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?
        .try_deserialize()?;

    config.model_directory = expand_placeholder(&config.model_directory, app_folder);
    config.output_directory = expand_placeholder(&config.output_directory, app_folder);
    Ok(config)
}

fn expand_placeholder(path: &Utf8Path, app_folder: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(path.as_str().replace(APP_DATA_PLACEHOLDER, app_folder.as_str()))
}

fn get_app_folder() -> Result<Utf8PathBuf, ConfigError> {
    let local_data = dirs::data_local_dir()
        .ok_or_else(|| ConfigError::Message("Failed to get local data directory".to_owned()))?;
    let folder = Utf8PathBuf::from_path_buf(local_data)
        .map_err(|p| ConfigError::Message(format!("Local data directory is not a valid UTF-8 path: {:?}", p)))?
        .join(APP_DIRECTORY_NAME);

    if !folder.exists() {
        fs::create_dir_all(&folder).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    }
    Ok(folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_defaults_expand_app_folder() {
        let config = load_pipeline_config(None, Utf8Path::new("/data/cellembed")).unwrap();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.image_size, 224);
        assert_eq!(config.max_images, None);
        assert_eq!(config.model_input, "input");
        assert_eq!(config.model_directory, Utf8PathBuf::from("/data/cellembed/models"));
        assert_eq!(config.output_directory, Utf8PathBuf::from("/data/cellembed/runs"));
    }

    #[test]
    fn user_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("pipeline.toml")).unwrap();
        fs::write(&path, "batch_size = 4\nmax_images = 10\nauthor = \"Cell Lab\"\nmodel_directory = \"/opt/models\"\n")
            .unwrap();

        let config = load_pipeline_config(Some(&path), Utf8Path::new("/data")).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.max_images, Some(10));
        assert_eq!(config.author, "Cell Lab");
        assert_eq!(config.model_directory, Utf8PathBuf::from("/opt/models"));
        assert_eq!(config.model_file, Utf8PathBuf::from("densenet121/densenet121_features.onnx"));
    }

    #[test]
    fn missing_user_file_falls_back_to_defaults() {
        let config = load_pipeline_config(Some(Utf8Path::new("/nonexistent/pipeline.toml")), Utf8Path::new("/d")).unwrap();
        assert_eq!(config.batch_size, 16);
    }
}
