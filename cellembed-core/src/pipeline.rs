use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use log::info;

use crate::{
    adapter::{AdapterOptions, RecordAdapter},
    dataset::{DatasetError, DatasetSource},
    embedding::Embedder,
    preprocess::{DEFAULT_TARGET_SIZE, ImagePreprocessor},
    provenance::{Artifact, ArtifactDescription, ProvenanceError, ProvenancePackager},
    runner::{BatchEmbeddingRunner, BatchProgress, RunnerError},
    writer::{MetadataTable, TableError, write_embeddings_tsv},
};

pub const EMBEDDINGS_FILE_NAME: &str = "embeddings.tsv";
pub const METADATA_FILE_NAME: &str = "metadata.tsv";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Error loading dataset records")]
    Dataset(#[from] DatasetError),
    #[error("Error creating output directory {path}")]
    OutputDirectory { path: Utf8PathBuf, #[source] source: std::io::Error },
    #[error("Error embedding images")]
    Runner(#[from] RunnerError),
    #[error("Error writing results")]
    Table(#[from] TableError),
    #[error("Error registering provenance")]
    Provenance(#[from] ProvenanceError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub record_set: String,
    /// Field prefix used to address record fields. Defaults to the record set name.
    pub field_prefix: Option<String>,
    pub max_images: Option<usize>,
    pub batch_size: usize,
    pub image_size: u32,
    pub output_dir: Utf8PathBuf,
}

impl PipelineOptions {
    pub fn new(record_set: &str, output_dir: &Utf8Path) -> Self {
        PipelineOptions {
            record_set: record_set.to_owned(),
            field_prefix: None,
            max_images: None,
            batch_size: 16,
            image_size: DEFAULT_TARGET_SIZE,
            output_dir: output_dir.to_owned(),
        }
    }

    fn adapter_options(&self, base_dir: Option<&Utf8Path>) -> AdapterOptions {
        AdapterOptions {
            field_prefix: self.field_prefix.clone().unwrap_or_else(|| self.record_set.clone()),
            max_images: self.max_images,
            base_dir: base_dir.map(Utf8Path::to_path_buf),
        }
    }
}

/// Descriptive parameters for the provenance registrations made after a run.
#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    pub author: String,
    pub version: String,
    pub software_name: String,
    pub software_description: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceIds {
    pub software: String,
    pub computation: String,
    pub dataset: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub dataset_name: String,
    pub records_seen: usize,
    /// Records dropped because their image could not be resolved
    pub skipped: usize,
    pub embedded: usize,
    pub dimension: usize,
    pub embeddings_path: Utf8PathBuf,
    pub metadata_path: Utf8PathBuf,
    pub provenance: Option<ProvenanceIds>,
}

/// Enumerates the record set and builds the adapter without touching any image data.
pub fn load_items(dataset: &dyn DatasetSource, options: &PipelineOptions) -> Result<RecordAdapter, PipelineError> {
    info!("Loading record set {} from dataset {}", options.record_set, dataset.name());
    let records = dataset.records(&options.record_set)?;
    Ok(RecordAdapter::new(records, &options.adapter_options(dataset.root()))
        .with_preprocessor(ImagePreprocessor::with_target_size(options.image_size)))
}

/// Runs the whole pipeline: records → items → batched embeddings → tables, then registers the
/// run with `packager` when one is given.
pub fn run_pipeline<E, P>(
    dataset: &dyn DatasetSource,
    embedder: E,
    options: &PipelineOptions,
    packaging: Option<(&mut dyn ProvenancePackager, &PackageOptions)>,
    on_batch: P,
) -> Result<PipelineSummary, PipelineError>
where
    E: Embedder,
    P: FnMut(BatchProgress),
{
    let adapter = load_items(dataset, options)?;
    embed_items(dataset, &adapter, embedder, options, packaging, on_batch)
}

/// Embeds the items of an already built adapter and writes the result tables. Lets callers
/// inspect the adapter (e.g. to confirm the run) before any image is embedded.
pub fn embed_items<E, P>(
    dataset: &dyn DatasetSource,
    adapter: &RecordAdapter,
    embedder: E,
    options: &PipelineOptions,
    packaging: Option<(&mut dyn ProvenancePackager, &PackageOptions)>,
    on_batch: P,
) -> Result<PipelineSummary, PipelineError>
where
    E: Embedder,
    P: FnMut(BatchProgress),
{
    let runner = BatchEmbeddingRunner::new(embedder, options.batch_size)?
        .with_preprocessor(ImagePreprocessor::with_target_size(options.image_size));
    let rows = runner.run(adapter.items(), on_batch)?;

    fs::create_dir_all(&options.output_dir)
        .map_err(|e| PipelineError::OutputDirectory { path: options.output_dir.clone(), source: e })?;
    let embeddings_path = options.output_dir.join(EMBEDDINGS_FILE_NAME);
    let metadata_path = options.output_dir.join(METADATA_FILE_NAME);
    write_embeddings_tsv(&rows, &embeddings_path)?;
    MetadataTable::from_rows(&rows).write_tsv(&metadata_path)?;
    info!("Embedded {} images, results written to {}", rows.len(), options.output_dir);

    let mut summary = PipelineSummary {
        dataset_name: dataset.name().to_owned(),
        records_seen: adapter.records_seen(),
        skipped: adapter.skipped(),
        embedded: rows.len(),
        dimension: rows.first().map_or(0, |row| row.vector.len()),
        embeddings_path,
        metadata_path,
        provenance: None,
    };

    if let Some((packager, package_options)) = packaging {
        summary.provenance = Some(register_provenance(packager, dataset, &summary, package_options)?);
    }
    Ok(summary)
}

/// Registers the software, the embedding computation and the resulting dataset, linked to the
/// upstream dataset.
pub fn register_provenance(
    packager: &mut dyn ProvenancePackager,
    dataset: &dyn DatasetSource,
    summary: &PipelineSummary,
    options: &PackageOptions,
) -> Result<ProvenanceIds, PipelineError> {
    let upstream: Vec<String> = dataset.identifier()
        .or(dataset.url())
        .map(str::to_owned)
        .into_iter()
        .collect();
    let describe = |name: String, description: String, files: Vec<Utf8PathBuf>| ArtifactDescription {
        guid: None,
        name,
        author: options.author.clone(),
        version: options.version.clone(),
        description,
        keywords: options.keywords.clone(),
        files,
    };

    let software = packager.register(Artifact::Software(describe(
        options.software_name.clone(),
        options.software_description.clone(),
        vec![],
    )))?;

    let outputs = vec![summary.embeddings_path.clone(), summary.metadata_path.clone()];
    let computation = packager.register(Artifact::Computation {
        description: describe(
            format!("Image embedding of {}", dataset.name()),
            format!("Embedded {} of {} records ({} skipped)", summary.embedded, summary.records_seen, summary.skipped),
            vec![],
        ),
        used_datasets: upstream.clone(),
        used_software: vec![software.clone()],
        generated: outputs.iter().map(|p| p.file_name().unwrap_or(p.as_str()).to_owned()).collect(),
    })?;

    let output_dataset = packager.register(Artifact::Dataset {
        description: describe(
            format!("{} image embeddings", dataset.name()),
            format!("{}-dimensional embeddings of {} images with per-image metadata", summary.dimension, summary.embedded),
            outputs,
        ),
        derived_from: upstream,
        generated_by: vec![computation.clone()],
    })?;

    info!("Registered provenance: software {}, computation {}, dataset {}", software, computation, output_dataset);
    Ok(ProvenanceIds { software, computation, dataset: output_dataset })
}
