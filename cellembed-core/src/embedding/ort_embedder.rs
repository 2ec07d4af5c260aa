use std::sync::Mutex;

use camino::Utf8Path;
use log::debug;
use ndarray::{Array4, ArrayViewD, Axis};
use ort::{inputs, session::Session, value::TensorRef};

use crate::embedding::{Embedder, EmbeddingError, sessions::create_session};

/// Image embedder running an ONNX export of a pretrained classifier backbone.
///
/// The vector length is whatever the model produces per image, so any backbone whose output
/// is `(N, k)` or `(N, k, 1, 1)` works without further configuration.
pub struct OrtEmbedder {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OrtEmbedder {
    pub fn load(model_path: &Utf8Path, input_name: &str, output_name: &str) -> Result<OrtEmbedder, EmbeddingError> {
        Ok(OrtEmbedder {
            session: Mutex::new(create_session(model_path)?),
            input_name: input_name.to_owned(),
            output_name: output_name.to_owned(),
        })
    }
}

impl Embedder for OrtEmbedder {
    fn embed_batch(&self, batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let batch_len = batch.shape()[0];
        debug!("OrtEmbedder: Embedding batch of {} images", batch_len);

        let mut model = self.session.lock().map_err(|_| EmbeddingError::Unknown {
            msg: "Inference session lock was poisoned",
            source: anyhow::anyhow!("poisoned session mutex"),
        })?;

        let outputs = model.run(inputs![
                self.input_name.as_str() => TensorRef::from_array_view(batch)
                    .map_err(|e| EmbeddingError::Preprocessing {
                        batch_len,
                        step: "Converting to tensor",
                        source: e.into(),
                    })?
            ])
            .map_err(|e| EmbeddingError::Calculation { batch_len,
                step: "Performing image embedding", source: e.into() })?;

        let output = outputs.get(self.output_name.as_str())
            .ok_or_else(|| EmbeddingError::OutputShape {
                batch_len,
                expected: format!("an output named '{}'", self.output_name),
                actual: "no such output".to_owned(),
            })?
            .try_extract_array::<f32>()
            .map_err(|e| EmbeddingError::Unknown {
                msg: "Error while extracting array from output as f32",
                source: e.into(),
            })?;

        output_rows(output, batch_len)
    }
}

/// Splits a network output into one flat vector per image. Every dimension after the batch
/// axis is folded into the vector, so pooled `(N, k, 1, 1)` features become length `k`.
fn output_rows(output: ArrayViewD<f32>, batch_len: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let shape = output.shape();
    if shape.len() < 2 || shape[0] != batch_len {
        return Err(EmbeddingError::OutputShape {
            batch_len,
            expected: format!("an array of shape ({}, ..)", batch_len),
            actual: format!("an array of shape {:?}", shape),
        });
    }

    Ok(output.axis_iter(Axis(0))
        .map(|row| row.iter().copied().collect())
        .collect())
}
