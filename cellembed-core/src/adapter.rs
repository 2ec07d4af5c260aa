use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use ndarray::Array3;

use crate::{preprocess::ImagePreprocessor, record::{FieldValue, Record, coerce_to_text}};

pub type Metadata = BTreeMap<String, String>;

pub const IMAGE_PATH_FIELD: &str = "image_path";
/// Descriptive fields copied into every item's metadata
pub const METADATA_FIELDS: [&str; 7] = [
    "treatment",
    "plate",
    "well",
    "channel",
    "antibody_id",
    "gene_id",
    "provenance_id",
];

/// A dataset record whose image resolved to a file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedItem {
    pub image_path: Utf8PathBuf,
    /// Basename of `image_path`
    pub item_id: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct AdapterOptions {
    /// Record set prefix, fields are read as `{prefix}/{field}`
    pub field_prefix: String,
    pub max_images: Option<usize>,
    /// Directory that relative image paths are resolved against
    pub base_dir: Option<Utf8PathBuf>,
}

impl AdapterOptions {
    pub fn field_name(&self, field: &str) -> String {
        if self.field_prefix.is_empty() {
            field.to_owned()
        } else {
            format!("{}/{}", self.field_prefix, field)
        }
    }
}

/// Maps dataset records onto image items with their descriptive metadata.
///
/// Records without a resolvable image are skipped rather than reported as errors; the number of
/// records consumed versus accepted is kept so callers can surface it.
pub struct RecordAdapter {
    items: Vec<IndexedItem>,
    records_seen: usize,
    preprocessor: ImagePreprocessor,
}

impl RecordAdapter {
    pub fn new<I>(records: I, options: &AdapterOptions) -> RecordAdapter
    where
        I: IntoIterator<Item = Record>,
    {
        let path_field = options.field_name(IMAGE_PATH_FIELD);
        let metadata_fields: Vec<(&str, String)> = METADATA_FIELDS.iter()
            .map(|field| (*field, options.field_name(field)))
            .collect();

        let mut items: Vec<IndexedItem> = vec![];
        let mut records_seen = 0;
        for record in records {
            if options.max_images.is_some_and(|max| items.len() >= max) {
                break;
            }
            records_seen += 1;

            let Some(image_path) = resolve_image_path(record.get(&path_field), options.base_dir.as_deref()) else {
                debug!("RecordAdapter: Skipping record {} without a resolvable image", records_seen - 1);
                continue;
            };
            let Some(item_id) = image_path.file_name().map(str::to_owned) else {
                debug!("RecordAdapter: Skipping record {} with image path {} lacking a file name",
                    records_seen - 1, image_path);
                continue;
            };

            let metadata = metadata_fields.iter()
                .map(|(key, field)| (key.to_string(), coerce_to_text(record.get(field))))
                .collect();
            items.push(IndexedItem { image_path, item_id, metadata });
        }

        info!("RecordAdapter: Accepted {} of {} records ({} skipped)",
            items.len(), records_seen, records_seen - items.len());
        RecordAdapter { items, records_seen, preprocessor: ImagePreprocessor::default() }
    }

    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn items(&self) -> &[IndexedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of records consumed, including skipped ones
    pub fn records_seen(&self) -> usize {
        self.records_seen
    }

    /// Number of consumed records dropped for lack of a resolvable image
    pub fn skipped(&self) -> usize {
        self.records_seen - self.items.len()
    }

    /// Preprocessed image, identifier and metadata for the item at `index`. The image is loaded
    /// on every call.
    pub fn get(&self, index: usize) -> Option<(Array3<f32>, &str, &Metadata)> {
        self.items.get(index).map(|item| {
            (self.preprocessor.preprocess_path(&item.image_path), item.item_id.as_str(), &item.metadata)
        })
    }
}

fn resolve_image_path(value: Option<&FieldValue>, base_dir: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
    let raw = value.filter(|v| !v.is_null())?.to_text();
    if raw.is_empty() {
        return None;
    }

    let path = Utf8PathBuf::from(raw);
    let path = match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    };
    path.is_file().then_some(path)
}
