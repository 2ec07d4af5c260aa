use std::path::PathBuf;

use camino::Utf8PathBuf;
use cellembed_core::{
    adapter::RecordAdapter,
    app_config::PipelineConfig,
    dataset::{DatasetSource, JsonDataset},
    embedding::{Embedder, ort_embedder::OrtEmbedder},
    init_embedding,
    pipeline::{PackageOptions, PipelineOptions, PipelineSummary, embed_items, load_items, register_provenance},
    provenance::JsonPackage,
};
use indicatif::ProgressBar;
use log::debug;

use crate::utility::{clean_path, confirm};

pub struct RunArgs {
    /// Dataset description file
    pub dataset: PathBuf,
    /// Record set to embed
    pub record_set: String,
    /// Field prefix, defaults to the record set name
    pub field_prefix: Option<String>,
    pub max_images: Option<usize>,
    pub batch_size: Option<usize>,
    pub output_dir: Option<PathBuf>,
    /// Model file, overriding the configured one
    pub model: Option<PathBuf>,
    /// Register the run in a provenance package in the output directory
    pub package: bool,
    pub author: Option<String>,
    /// Report what would be embedded and exit
    pub dry_run: bool,
    /// Do not confirm before embedding
    pub force: bool,
}

pub fn run(args: RunArgs, config: &PipelineConfig) -> anyhow::Result<()> {
    let dataset_path = clean_path(args.dataset)?;
    let dataset = JsonDataset::open(&dataset_path)?;

    let output_dir = match args.output_dir {
        Some(dir) => clean_path(dir)?,
        None => default_output_dir(config, &args.record_set),
    };
    let options = PipelineOptions {
        record_set: args.record_set,
        field_prefix: args.field_prefix,
        max_images: args.max_images.or(config.max_images),
        batch_size: args.batch_size.unwrap_or(config.batch_size),
        image_size: config.image_size,
        output_dir,
    };
    debug!("Pipeline options: {:?}", options);

    let adapter = load_items(&dataset, &options)?;
    let summary = format!("{} record(s) read from {} ({}).\n\
        {} image(s) queued for embedding in batches of {}.\n\
        {} record(s) skipped for missing images.",
        adapter.records_seen(),
        dataset.name(),
        dataset.url().unwrap_or("no url"),
        adapter.len(),
        options.batch_size,
        adapter.skipped());

    if args.dry_run {
        println!("{summary}\nRecord sets in {}: {}", dataset_path,
            dataset.record_set_names().collect::<Vec<_>>().join(", "));
        return Ok(());
    }
    if adapter.is_empty() {
        println!("{summary}\nNothing to do! Goodbye.");
        return Ok(());
    }
    if args.force {
        println!("{summary}");
    } else if !confirm(&summary)? {
        println!("Aborting...");
        return Ok(());
    }

    init_embedding(Some(&config.model_directory));
    let model_path = match args.model {
        Some(model) => clean_path(model)?,
        None => config.model_file.clone(),
    };
    let embedder = OrtEmbedder::load(&model_path, &config.model_input, &config.model_output)?;

    let package_options = args.package.then(|| PackageOptions {
        author: args.author.unwrap_or_else(|| config.author.clone()),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        software_name: "cellembed".to_owned(),
        software_description: "Batch image embedding pipeline".to_owned(),
        keywords: vec!["embeddings".to_owned(), "images".to_owned(), dataset.name().to_owned()],
    });

    let summary = embed_and_package(&dataset, &adapter, embedder, &options, package_options.as_ref())?;

    println!("{} images successfully embedded, {} records skipped.", summary.embedded, summary.skipped);
    println!("Embeddings written to {}", summary.embeddings_path);
    println!("Metadata written to {}", summary.metadata_path);
    if let Some(ids) = summary.provenance {
        println!("Registered dataset {} generated by computation {}", ids.dataset, ids.computation);
    }
    Ok(())
}

/// Embeds the adapter's items with a progress bar. The provenance package is only created in
/// the output directory once the tables have been written.
pub fn embed_and_package<E: Embedder>(
    dataset: &JsonDataset,
    adapter: &RecordAdapter,
    embedder: E,
    options: &PipelineOptions,
    package_options: Option<&PackageOptions>,
) -> anyhow::Result<PipelineSummary> {
    let bar = ProgressBar::new(adapter.len() as u64);
    let result = embed_items(dataset, adapter, embedder, options, None, |progress| {
        bar.set_position(progress.items_done as u64);
        bar.println(format!("Batch {}/{} embedded", progress.batch_index + 1, progress.batch_count));
    });
    bar.finish();
    let mut summary = result?;

    if let Some(package_options) = package_options {
        let mut package = JsonPackage::create(&options.output_dir, &format!("{} embeddings", dataset.name()),
            "Image embeddings with per-image metadata and provenance")?;
        summary.provenance = Some(register_provenance(&mut package, dataset, &summary, package_options)?);
    }
    Ok(summary)
}

/// Output directory used when none is given on the command line
pub fn default_output_dir(config: &PipelineConfig, record_set: &str) -> Utf8PathBuf {
    config.output_directory.join(record_set)
}
