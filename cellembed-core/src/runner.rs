use std::ops::Range;

use log::{debug, info};
use ndarray::{Array4, Axis};

use crate::{adapter::{IndexedItem, Metadata}, embedding::{Embedder, EmbeddingError}, preprocess::ImagePreprocessor};

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
    #[error("Embedding failed for batch {batch_index} (items {start}..{end})")]
    Embedding { batch_index: usize, start: usize, end: usize, #[source] source: EmbeddingError },
}

/// One embedded image. Rows are created once a batch completes and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRow {
    pub item_id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// Reported to the progress callback after every completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub batch_count: usize,
    pub items_done: usize,
    pub items_total: usize,
}

/// Consecutive index ranges of at most `batch_size` covering `0..len`; only the last may be shorter.
pub fn batch_ranges(len: usize, batch_size: usize) -> Result<impl Iterator<Item = Range<usize>>, RunnerError> {
    if batch_size == 0 {
        return Err(RunnerError::InvalidBatchSize);
    }
    Ok((0..len).step_by(batch_size).map(move |start| start..(start + batch_size).min(len)))
}

pub struct BatchEmbeddingRunner<E: Embedder> {
    embedder: E,
    batch_size: usize,
    preprocessor: ImagePreprocessor,
}

impl<E: Embedder> BatchEmbeddingRunner<E> {
    pub fn new(embedder: E, batch_size: usize) -> Result<Self, RunnerError> {
        if batch_size == 0 {
            return Err(RunnerError::InvalidBatchSize);
        }
        Ok(BatchEmbeddingRunner { embedder, batch_size, preprocessor: ImagePreprocessor::default() })
    }

    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Embeds `items` batch by batch, calling the embedder exactly once per batch. The returned
    /// rows are in input order. The first embedder failure aborts the run.
    pub fn run<P>(&self, items: &[IndexedItem], mut on_batch: P) -> Result<Vec<EmbeddingRow>, RunnerError>
    where
        P: FnMut(BatchProgress),
    {
        let batch_count = items.len().div_ceil(self.batch_size);
        let mut rows = Vec::with_capacity(items.len());
        let mut dimension = None;

        for (batch_index, range) in batch_ranges(items.len(), self.batch_size)?.enumerate() {
            let batch = &items[range.clone()];
            debug!("BatchEmbeddingRunner: Preprocessing batch {} ({} images)", batch_index, batch.len());
            let tensor = self.preprocess_batch(batch);

            let embedding_error = |source: EmbeddingError| RunnerError::Embedding {
                batch_index,
                start: range.start,
                end: range.end,
                source,
            };
            let vectors = self.embedder.embed_batch(&tensor).map_err(embedding_error)?;
            check_vectors(&vectors, batch.len(), &mut dimension).map_err(embedding_error)?;

            rows.extend(batch.iter().zip(vectors).map(|(item, vector)| EmbeddingRow {
                item_id: item.item_id.clone(),
                vector,
                metadata: item.metadata.clone(),
            }));

            info!("BatchEmbeddingRunner: Embedded batch {}/{} ({}/{} images)",
                batch_index + 1, batch_count, rows.len(), items.len());
            on_batch(BatchProgress {
                batch_index,
                batch_count,
                items_done: rows.len(),
                items_total: items.len(),
            });
        }

        Ok(rows)
    }

    fn preprocess_batch(&self, batch: &[IndexedItem]) -> Array4<f32> {
        let size = self.preprocessor.target_size as usize;
        let mut tensor = Array4::zeros((batch.len(), 3, size, size));
        for (mut slot, item) in tensor.axis_iter_mut(Axis(0)).zip(batch) {
            slot.assign(&self.preprocessor.preprocess_path(&item.image_path));
        }
        tensor
    }
}

fn check_vectors(vectors: &[Vec<f32>], batch_len: usize, dimension: &mut Option<usize>) -> Result<(), EmbeddingError> {
    if vectors.len() != batch_len {
        return Err(EmbeddingError::OutputShape {
            batch_len,
            expected: format!("{} vectors", batch_len),
            actual: format!("{} vectors", vectors.len()),
        });
    }

    for vector in vectors {
        let expected = *dimension.get_or_insert(vector.len());
        if vector.len() != expected {
            return Err(EmbeddingError::OutputShape {
                batch_len,
                expected: format!("vectors of length {}", expected),
                actual: format!("a vector of length {}", vector.len()),
            });
        }
    }
    Ok(())
}
