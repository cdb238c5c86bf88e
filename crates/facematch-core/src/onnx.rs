//! Production extractor: SCRFD detection + ArcFace recognition.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::detector::{DetectorError, FaceDetector};
use crate::error::FaceError;
use crate::extractor::{DetectedFace, EmbeddingExtractor, DEFAULT_DETECTOR_ID, DEFAULT_MODEL_ID};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_COSINE_THRESHOLD};
use crate::types::{BoundingBox, PixelBuffer, Signature};

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Most faces embedded per image; the rest of a crowd is dropped.
pub const MAX_FACES_PER_IMAGE: usize = 8;

/// ONNX Runtime sessions need exclusive access per run, so each model sits
/// behind its own mutex.
pub struct OnnxExtractor {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, FaceError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy()).map_err(|e| {
            FaceError::ExtractorUnavailable(format!("SCRFD detector: {e}"))
        })?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy()).map_err(|e| {
            FaceError::ExtractorUnavailable(format!("ArcFace recognizer: {e}"))
        })?;

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }

    /// Loader closure for [`ExtractorHandle::lazy`](crate::ExtractorHandle::lazy).
    pub fn loader(
        model_dir: impl AsRef<Path>,
    ) -> impl Fn() -> Result<Arc<dyn EmbeddingExtractor>, FaceError> + Send + Sync + 'static {
        let dir = model_dir.as_ref().to_path_buf();
        move || Ok(Arc::new(Self::load(&dir)?) as Arc<dyn EmbeddingExtractor>)
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn represent(
        &self,
        pixels: &PixelBuffer,
        model_id: &str,
        detector_id: &str,
        enforce_detection: bool,
    ) -> Result<Vec<DetectedFace>, FaceError> {
        if model_id != DEFAULT_MODEL_ID {
            return Err(FaceError::ExtractorUnavailable(format!(
                "model '{model_id}' not loaded (have '{DEFAULT_MODEL_ID}')"
            )));
        }
        if detector_id != DEFAULT_DETECTOR_ID {
            return Err(FaceError::ExtractorUnavailable(format!(
                "detector '{detector_id}' not loaded (have '{DEFAULT_DETECTOR_ID}')"
            )));
        }

        let boxes = self
            .detector
            .lock()
            .map_err(|_| FaceError::Internal("detector lock poisoned".into()))?
            .detect(pixels, enforce_detection)
            .map_err(detector_failure)?;

        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        // One ArcFace run per face. Boxes arrive strongest first.
        let mut faces = Vec::with_capacity(boxes.len().min(MAX_FACES_PER_IMAGE));
        for face in limit_faces(boxes) {
            let raw = self
                .recognizer
                .lock()
                .map_err(|_| FaceError::Internal("recognizer lock poisoned".into()))?
                .extract(pixels, &face)
                .map_err(recognizer_failure)?;
            faces.push(DetectedFace {
                signature: Signature::new(raw)?,
                region: Some(face),
            });
        }
        Ok(faces)
    }

    fn native_threshold(&self) -> f64 {
        ARCFACE_COSINE_THRESHOLD
    }
}

/// Strongest `MAX_FACES_PER_IMAGE` boxes, in detector order.
fn limit_faces(mut boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    if boxes.len() > MAX_FACES_PER_IMAGE {
        tracing::debug!(detected = boxes.len(), kept = MAX_FACES_PER_IMAGE, "capping faces per image");
        boxes.truncate(MAX_FACES_PER_IMAGE);
    }
    boxes
}

fn detector_failure(e: DetectorError) -> FaceError {
    FaceError::Internal(format!("face detection failed: {e}"))
}

fn recognizer_failure(e: RecognizerError) -> FaceError {
    FaceError::Internal(format!("embedding extraction failed: {e}"))
}
