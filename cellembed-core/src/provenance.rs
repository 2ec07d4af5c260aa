use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use log::{debug, info};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

pub const MANIFEST_FILE_NAME: &str = "provenance-metadata.json";
const ARK_NAAN: &str = "ark:59852";

#[derive(thiserror::Error, Debug)]
pub enum ProvenanceError {
    #[error("Error interacting with package directory at {path}")]
    IO { path: Utf8PathBuf, #[source] source: std::io::Error },
    #[error("Error serializing provenance manifest for package at {path}")]
    Serialize { path: Utf8PathBuf, #[source] source: serde_json::Error },
    #[error("Artifact file {path} does not exist")]
    MissingFile { path: Utf8PathBuf },
    #[error("Identifier {guid} is already registered in this package")]
    DuplicateIdentifier { guid: String },
}

/// Descriptive parameters shared by every kind of artifact.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDescription {
    /// Pre-assigned identifier. One is minted when absent.
    pub guid: Option<String>,
    pub name: String,
    pub author: String,
    pub version: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub files: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub enum Artifact {
    Software(ArtifactDescription),
    Computation {
        description: ArtifactDescription,
        used_datasets: Vec<String>,
        used_software: Vec<String>,
        /// Files produced by the computation
        generated: Vec<String>,
    },
    Dataset {
        description: ArtifactDescription,
        derived_from: Vec<String>,
        generated_by: Vec<String>,
    },
}

impl Artifact {
    pub fn description(&self) -> &ArtifactDescription {
        match self {
            Artifact::Software(description) => description,
            Artifact::Computation { description, .. } => description,
            Artifact::Dataset { description, .. } => description,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Software(_) => "software",
            Artifact::Computation { .. } => "computation",
            Artifact::Dataset { .. } => "dataset",
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Artifact::Software(_) => "Software",
            Artifact::Computation { .. } => "Computation",
            Artifact::Dataset { .. } => "Dataset",
        }
    }
}

/// Registers artifacts and the relationships between them in a provenance package.
pub trait ProvenancePackager {
    /// Registers `artifact` and returns the identifier it was assigned
    fn register(&mut self, artifact: Artifact) -> Result<String, ProvenanceError>;
}

#[derive(Debug, Clone, Serialize)]
struct Manifest {
    #[serde(rename = "@context")]
    context: Value,
    #[serde(rename = "@graph")]
    graph: Vec<Value>,
}

/// A provenance package kept as a directory with a JSON manifest describing every registered
/// artifact. The manifest is rewritten after each registration.
pub struct JsonPackage {
    root: Utf8PathBuf,
    manifest: Manifest,
}

impl JsonPackage {
    pub fn create(root: &Utf8Path, name: &str, description: &str) -> Result<JsonPackage, ProvenanceError> {
        fs::create_dir_all(root).map_err(|e| ProvenanceError::IO { path: root.to_owned(), source: e })?;

        let package = JsonPackage {
            root: root.to_owned(),
            manifest: Manifest {
                context: json!({ "@vocab": "https://schema.org/", "evi": "https://w3id.org/EVI#" }),
                graph: vec![json!({
                    "@id": MANIFEST_FILE_NAME,
                    "@type": "CreativeWork",
                    "name": name,
                    "description": description,
                    "dateCreated": Utc::now().to_rfc3339(),
                })],
            },
        };
        package.save()?;
        info!("Created provenance package at {}", root);
        Ok(package)
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    /// Entries registered so far, excluding the manifest's own descriptor
    pub fn entries(&self) -> &[Value] {
        &self.manifest.graph[1..]
    }

    fn contains(&self, guid: &str) -> bool {
        self.manifest.graph.iter().any(|entry| entry["@id"] == guid)
    }

    fn save(&self) -> Result<(), ProvenanceError> {
        let path = self.manifest_path();
        let bytes = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| ProvenanceError::Serialize { path: self.root.clone(), source: e })?;
        fs::write(&path, bytes).map_err(|e| ProvenanceError::IO { path, source: e })
    }

    /// Brings `file` into the package directory if it lives elsewhere and returns its path
    /// relative to the package root.
    fn include_file(&self, file: &Utf8Path) -> Result<String, ProvenanceError> {
        if !file.is_file() {
            return Err(ProvenanceError::MissingFile { path: file.to_owned() });
        }
        if let Ok(relative) = file.strip_prefix(&self.root) {
            return Ok(relative.to_string());
        }

        let file_name = file.file_name().ok_or_else(|| ProvenanceError::MissingFile { path: file.to_owned() })?;
        let destination = self.root.join(file_name);
        debug!("Copying {} into provenance package at {}", file, destination);
        fs::copy(file, &destination).map_err(|e| ProvenanceError::IO { path: destination.clone(), source: e })?;
        Ok(file_name.to_owned())
    }
}

impl ProvenancePackager for JsonPackage {
    fn register(&mut self, artifact: Artifact) -> Result<String, ProvenanceError> {
        let description = artifact.description();
        let guid = description.guid.clone()
            .unwrap_or_else(|| mint_identifier(artifact.kind(), &description.name));
        if self.contains(&guid) {
            return Err(ProvenanceError::DuplicateIdentifier { guid });
        }

        let files = description.files.iter()
            .map(|file| self.include_file(file))
            .collect::<Result<Vec<String>, ProvenanceError>>()?;

        let mut entry = json!({
            "@id": guid,
            "@type": format!("evi:{}", artifact.type_name()),
            "name": description.name,
            "author": description.author,
            "version": description.version,
            "description": description.description,
            "keywords": description.keywords,
            "dateCreated": Utc::now().to_rfc3339(),
        });
        if !files.is_empty() {
            entry["contentUrl"] = json!(files.iter().map(|f| format!("file:///{}", f)).collect::<Vec<_>>());
        }
        match &artifact {
            Artifact::Software(_) => {},
            Artifact::Computation { used_datasets, used_software, generated, .. } => {
                entry["usedDataset"] = id_refs(used_datasets);
                entry["usedSoftware"] = id_refs(used_software);
                entry["generated"] = id_refs(generated);
            },
            Artifact::Dataset { derived_from, generated_by, .. } => {
                entry["derivedFrom"] = id_refs(derived_from);
                entry["generatedBy"] = id_refs(generated_by);
            },
        }

        debug!("Registering {} {} as {}", artifact.kind(), description.name, guid);
        self.manifest.graph.push(entry);
        self.save()?;
        Ok(guid)
    }
}

fn id_refs(ids: &[String]) -> Value {
    json!(ids.iter().map(|id| json!({ "@id": id })).collect::<Vec<_>>())
}

fn mint_identifier(kind: &str, name: &str) -> String {
    let slug: String = name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}/{}-{}-{}", ARK_NAAN, kind, slug, &uuid[..8])
}
