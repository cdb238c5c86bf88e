//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional signatures from aligned 112x112 RGB face crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, PixelBuffer};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Cosine distance below which two ArcFace signatures are the same person.
pub const ARCFACE_COSINE_THRESHOLD: f64 = 0.68;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Raw (unnormalized) signature for one detected face.
    pub fn extract(
        &mut self,
        pixels: &PixelBuffer,
        face: &BoundingBox,
    ) -> Result<Vec<f32>, RecognizerError> {
        let aligned = alignment::align_face(pixels, face);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(RecognizerError::InferenceFailed(
                "embedding contains non-finite values".into(),
            ));
        }

        Ok(raw.to_vec())
    }
}

/// Interleaved 112x112 RGB crop → NCHW float tensor.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = ALIGNED_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (i, px) in aligned.chunks_exact(3).take(size * size).enumerate() {
        let (y, x) = (i / size, i % size);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = vec![128u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let aligned = vec![255u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 1, 5, 7]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channel_order() {
        let aligned: Vec<u8> = [0u8, 255, 128]
            .iter()
            .copied()
            .cycle()
            .take(ALIGNED_SIZE * ALIGNED_SIZE * 3)
            .collect();
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 0, 3, 3]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 3, 3]] - 1.0).abs() < 1e-6);
        let expected_b = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 2, 3, 3]] - expected_b).abs() < 1e-6);
    }
}
