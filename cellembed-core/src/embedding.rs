use ndarray::Array4;

#[derive(thiserror::Error, Debug)]
pub enum EmbeddingError {
    #[error("Error during initialization of embedding model at {model}")]
    Initialization { model: String, #[source] source: anyhow::Error },
    #[error("Error while preparing batch of {batch_len} images for embedding at step: {step}")]
    Preprocessing { batch_len: usize, step: &'static str, #[source] source: anyhow::Error },
    #[error("Error while performing neural network calculations on batch of {batch_len} images at step: {step}")]
    Calculation { batch_len: usize, step: &'static str, #[source] source: anyhow::Error },
    #[error("Embedding model returned {actual} for a batch of {batch_len} images, expected {expected}")]
    OutputShape { batch_len: usize, expected: String, actual: String },
    #[error("Error: {msg}")]
    Unknown { msg: &'static str, #[source] source: anyhow::Error },
}

/// A network mapping a batch of preprocessed `[N, 3, H, W]` image tensors to one embedding vector
/// per image, in the same order.
///
/// Implementations are treated as pure functions at inference time.
pub trait Embedder {
    fn embed_batch(&self, batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn embed_batch(&self, batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(batch)
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed_batch(&self, batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(batch)
    }
}

/// Embedder backed by a plain function or closure.
pub struct FnEmbedder<F> {
    func: F,
}

impl<F> FnEmbedder<F>
where
    F: Fn(&Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError>,
{
    pub fn new(func: F) -> Self {
        FnEmbedder { func }
    }
}

impl<F> Embedder for FnEmbedder<F>
where
    F: Fn(&Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError>,
{
    fn embed_batch(&self, batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (self.func)(batch)
    }
}

pub mod sessions;
pub mod ort_embedder;
