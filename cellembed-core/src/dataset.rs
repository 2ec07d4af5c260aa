use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use serde::Deserialize;

use crate::record::Record;

#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("Error reading dataset description at {path}")]
    IO { path: Utf8PathBuf, #[source] source: std::io::Error },
    #[error("Dataset description at {path} could not be parsed")]
    Parse { path: Utf8PathBuf, #[source] source: serde_json::Error },
    #[error("Record set {name} is not described in dataset {dataset}")]
    UnknownRecordSet { dataset: String, name: String },
}

/// Describes a source of dataset records.
///
/// The dataset-level attributes are carried through to provenance registration; records are
/// enumerated per named record set.
pub trait DatasetSource {
    fn name(&self) -> &str;
    fn url(&self) -> Option<&str>;
    /// Upstream identifier of the dataset, if it has been assigned one
    fn identifier(&self) -> Option<&str>;
    /// Directory that relative image paths in the records resolve against
    fn root(&self) -> Option<&Utf8Path>;
    fn records(&self, record_set: &str) -> Result<Vec<Record>, DatasetError>;
}

/// A dataset description stored as a single JSON document:
///
/// ```json
/// {
///   "name": "...",
///   "url": "...",
///   "identifier": "ark:...",
///   "recordSet": [{ "name": "images", "records": [{ "images/image_path": "a.png" }] }]
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JsonDataset {
    description: JsonDescription,
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonDescription {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default, rename = "recordSet")]
    record_sets: Vec<JsonRecordSet>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRecordSet {
    name: String,
    #[serde(default)]
    records: Vec<Record>,
}

impl JsonDataset {
    pub fn open(path: &Utf8Path) -> Result<JsonDataset, DatasetError> {
        debug!("JsonDataset: Loading dataset description at path: {}", path);
        let bytes = fs::read(path).map_err(|e| DatasetError::IO { path: path.to_owned(), source: e })?;
        let description: JsonDescription = serde_json::from_slice(&bytes)
            .map_err(|e| DatasetError::Parse { path: path.to_owned(), source: e })?;

        let root = path.parent().map(Utf8Path::to_path_buf).unwrap_or_default();
        Ok(JsonDataset { description, root })
    }

    pub fn record_set_names(&self) -> impl Iterator<Item = &str> {
        self.description.record_sets.iter().map(|rs| rs.name.as_str())
    }
}

impl DatasetSource for JsonDataset {
    fn name(&self) -> &str {
        &self.description.name
    }

    fn url(&self) -> Option<&str> {
        self.description.url.as_deref()
    }

    fn identifier(&self) -> Option<&str> {
        self.description.identifier.as_deref()
    }

    fn root(&self) -> Option<&Utf8Path> {
        Some(&self.root)
    }

    fn records(&self, record_set: &str) -> Result<Vec<Record>, DatasetError> {
        self.description.record_sets.iter()
            .find(|rs| rs.name == record_set)
            .map(|rs| rs.records.clone())
            .ok_or_else(|| DatasetError::UnknownRecordSet {
                dataset: self.description.name.clone(),
                name: record_set.to_owned(),
            })
    }
}
