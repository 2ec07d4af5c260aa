use std::{cell::Cell, fs};

use camino::{Utf8Path, Utf8PathBuf};
use cellembed_core::{
    dataset::{DatasetSource, JsonDataset},
    embedding::{EmbeddingError, FnEmbedder},
    pipeline::{PackageOptions, PipelineError, PipelineOptions, load_items, run_pipeline},
    provenance::{JsonPackage, ProvenancePackager},
    runner::RunnerError,
    writer::read_embeddings_tsv,
};
use image::RgbImage;
use ndarray::{Array4, Axis};
use serde_json::{Value, json};

const DIMENSION: usize = 1024;
const IMAGE_SIZE: u32 = 32;

struct Workspace {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Workspace { _dir: dir, root }
    }

    /// Writes `n` images plus a dataset description referencing them. Indexes in `missing`
    /// reference files that are never written.
    fn dataset(&self, n: usize, missing: &[usize]) -> Utf8PathBuf {
        fs::create_dir_all(self.root.join("images")).unwrap();
        let records: Vec<Value> = (0..n).map(|i| {
            let relative = format!("images/cell_{i:02}.png");
            if !missing.contains(&i) {
                RgbImage::from_pixel(48, 48, image::Rgb([i as u8 * 10, 20, 30]))
                    .save(self.root.join(&relative))
                    .unwrap();
            }
            json!({
                "hpa/image_path": relative,
                "hpa/plate": i / 4,
                "hpa/well": format!("A{}", i % 4),
                "hpa/antibody_id": "HPA000001",
                "hpa/gene_id": [69, 78, 83, 71],
                "hpa/treatment": null,
            })
        }).collect();

        let path = self.root.join("dataset.json");
        let description = json!({
            "name": "Cell painting subset",
            "url": "https://example.org/cells",
            "identifier": "ark:59852/dataset-cells",
            "recordSet": [{ "name": "hpa", "records": records }],
        });
        fs::write(&path, serde_json::to_vec(&description).unwrap()).unwrap();
        path
    }

    fn output(&self) -> Utf8PathBuf {
        self.root.join("out")
    }
}

/// Stands in for the network: every vector is filled with the image's mean red value
fn mean_red(batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Ok(batch.axis_iter(Axis(0))
        .map(|image| vec![image.index_axis(Axis(0), 0).mean().unwrap_or_default(); DIMENSION])
        .collect())
}

fn options(root: &Utf8Path, max_images: Option<usize>, batch_size: usize) -> PipelineOptions {
    PipelineOptions {
        max_images,
        batch_size,
        image_size: IMAGE_SIZE,
        ..PipelineOptions::new("hpa", root)
    }
}

#[test]
fn ten_records_in_a_single_batch() {
    let workspace = Workspace::new();
    let dataset = JsonDataset::open(&workspace.dataset(10, &[])).unwrap();
    let calls = Cell::new(0);
    let embedder = FnEmbedder::new(|batch: &Array4<f32>| {
        calls.set(calls.get() + 1);
        mean_red(batch)
    });

    let mut batches = vec![];
    let summary = run_pipeline(&dataset, &embedder, &options(&workspace.output(), Some(10), 16), None,
        |p| batches.push(p)).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(batches.len(), 1);
    assert_eq!(summary.embedded, 10);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.dimension, DIMENSION);
    assert!(summary.provenance.is_none());

    let contents = fs::read_to_string(&summary.embeddings_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 11);
    assert!(lines.iter().all(|line| line.split('\t').count() == 1 + DIMENSION));

    let table = read_embeddings_tsv(&summary.embeddings_path).unwrap();
    let expected_ids: Vec<String> = (0..10).map(|i| format!("cell_{i:02}.png")).collect();
    assert_eq!(table.ids, expected_ids);
    // brighter red → larger mean, so input order shows up as increasing values
    assert!(table.vectors.windows(2).all(|w| w[0][0] < w[1][0]));

    let metadata = fs::read_to_string(&summary.metadata_path).unwrap();
    let header: Vec<&str> = metadata.lines().next().unwrap().split('\t').collect();
    assert_eq!(header[0], "image_id");
    assert!(header.contains(&"gene_id") && header.contains(&"provenance_id"));
    let gene_column = header.iter().position(|c| *c == "gene_id").unwrap();
    let well_column = header.iter().position(|c| *c == "well").unwrap();
    let first_row: Vec<&str> = metadata.lines().nth(1).unwrap().split('\t').collect();
    assert_eq!(first_row[gene_column], "ENSG");
    assert_eq!(first_row[well_column], "A0");
}

#[test]
fn missing_image_is_skipped_and_counted() {
    let workspace = Workspace::new();
    let dataset = JsonDataset::open(&workspace.dataset(10, &[3])).unwrap();

    let adapter = load_items(&dataset, &options(&workspace.output(), None, 4)).unwrap();
    assert_eq!(adapter.len(), 9);
    assert_eq!(adapter.records_seen(), 10);
    assert_eq!(adapter.skipped(), 1);

    let summary = run_pipeline(&dataset, FnEmbedder::new(mean_red), &options(&workspace.output(), None, 4), None,
        |_| {}).unwrap();
    assert_eq!(summary.embedded, 9);
    assert_eq!(summary.skipped, 1);
    let table = read_embeddings_tsv(&summary.embeddings_path).unwrap();
    assert!(!table.ids.contains(&"cell_03.png".to_owned()));
}

#[test]
fn max_images_caps_the_run() {
    let workspace = Workspace::new();
    let dataset = JsonDataset::open(&workspace.dataset(10, &[])).unwrap();

    let summary = run_pipeline(&dataset, FnEmbedder::new(mean_red), &options(&workspace.output(), Some(4), 3), None,
        |_| {}).unwrap();
    assert_eq!(summary.embedded, 4);
    assert_eq!(summary.records_seen, 4);
}

#[test]
fn undecodable_image_still_produces_a_row() {
    let workspace = Workspace::new();
    let description = workspace.dataset(3, &[]);
    fs::write(workspace.root.join("images/cell_01.png"), b"truncated").unwrap();
    let dataset = JsonDataset::open(&description).unwrap();

    let summary = run_pipeline(&dataset, FnEmbedder::new(mean_red), &options(&workspace.output(), None, 2), None,
        |_| {}).unwrap();
    assert_eq!(summary.embedded, 3);

    // placeholder is black, which normalizes to -mean/std
    let table = read_embeddings_tsv(&summary.embeddings_path).unwrap();
    assert!((table.vectors[1][0] - (-0.485 / 0.229)).abs() < 1e-4);
}

#[test]
fn embedding_failure_aborts_without_output() {
    let workspace = Workspace::new();
    let dataset = JsonDataset::open(&workspace.dataset(5, &[])).unwrap();
    let failing = FnEmbedder::new(|batch: &Array4<f32>| Err(EmbeddingError::Calculation {
        batch_len: batch.shape()[0],
        step: "inference",
        source: anyhow::anyhow!("device lost"),
    }));

    let result = run_pipeline(&dataset, failing, &options(&workspace.output(), None, 2), None, |_| {});
    assert!(matches!(result, Err(PipelineError::Runner(RunnerError::Embedding { batch_index: 0, .. }))));
    assert!(!workspace.output().join("embeddings.tsv").exists());
}

#[test]
fn registers_provenance_for_the_run() {
    let workspace = Workspace::new();
    let dataset = JsonDataset::open(&workspace.dataset(4, &[])).unwrap();
    let output = workspace.output();
    let mut package = JsonPackage::create(&output, "Embedding run", "test package").unwrap();
    let package_options = PackageOptions {
        author: "Cell Lab".to_owned(),
        version: "0.1.0".to_owned(),
        software_name: "cellembed".to_owned(),
        ..Default::default()
    };

    let packager: &mut dyn ProvenancePackager = &mut package;
    let summary = run_pipeline(&dataset, FnEmbedder::new(mean_red), &options(&output, None, 2),
        Some((packager, &package_options)), |_| {}).unwrap();
    let ids = summary.provenance.unwrap();

    let entries = package.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["@id"], ids.software.as_str());
    assert_eq!(entries[1]["usedDataset"][0]["@id"], dataset.identifier().unwrap());
    assert_eq!(entries[1]["generated"][0]["@id"], "embeddings.tsv");
    assert_eq!(entries[2]["@id"], ids.dataset.as_str());
    assert_eq!(entries[2]["derivedFrom"][0]["@id"], "ark:59852/dataset-cells");
    assert_eq!(entries[2]["generatedBy"][0]["@id"], ids.computation.as_str());
    assert_eq!(entries[2]["contentUrl"].as_array().unwrap().len(), 2);
}
