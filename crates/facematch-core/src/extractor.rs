//! Embedding extractor capability and the adapter the pipeline talks to.
//!
//! The extractor (detector + recognition model) is expensive to load, so it
//! lives behind an [`ExtractorHandle`]: loaded at most once per process, with
//! the first load serialized and every later access lock-free.

use std::sync::{Arc, Mutex, OnceLock, TryLockError};

use crate::error::FaceError;
use crate::types::{BoundingBox, PixelBuffer, Signature};

/// Recognition model requested by default (512-dim ArcFace).
pub const DEFAULT_MODEL_ID: &str = "arcface_w600k_r50";
/// Face detector backend requested by default.
pub const DEFAULT_DETECTOR_ID: &str = "scrfd_10g";

/// One face found by an extractor.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub signature: Signature,
    /// Face region in image coordinates, when the detector located one.
    pub region: Option<BoundingBox>,
}

/// Capability interface for an embedding model plus its face detector.
pub trait EmbeddingExtractor: Send + Sync {
    /// Detect faces in `pixels` and return one signature per face, best first.
    ///
    /// With `enforce_detection` off, a low-confidence best candidate is still
    /// returned instead of reporting no faces.
    fn represent(
        &self,
        pixels: &PixelBuffer,
        model_id: &str,
        detector_id: &str,
        enforce_detection: bool,
    ) -> Result<Vec<DetectedFace>, FaceError>;

    /// Model-defined cosine distance below which two faces are the same person.
    fn native_threshold(&self) -> f64;
}

/// Outcome of extracting a signature from one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Face(Signature),
    NoFace,
}

impl Extraction {
    pub fn into_signature(self) -> Result<Signature, FaceError> {
        match self {
            Extraction::Face(sig) => Ok(sig),
            Extraction::NoFace => Err(FaceError::NoFaceDetected),
        }
    }
}

type Loader = dyn Fn() -> Result<Arc<dyn EmbeddingExtractor>, FaceError> + Send + Sync;

/// Load state reported by [`ExtractorHandle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorStatus {
    Loaded,
    Loading,
    NotLoaded,
    Failed(String),
}

impl ExtractorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorStatus::Loaded => "loaded",
            ExtractorStatus::Loading => "loading",
            ExtractorStatus::NotLoaded => "not_loaded",
            ExtractorStatus::Failed(_) => "failed",
        }
    }
}

/// Once-initialized, process-wide extractor.
///
/// A failed load is recorded for [`status`](Self::status) and attempted again
/// by the next caller; it never poisons the handle.
pub struct ExtractorHandle {
    cell: OnceLock<Arc<dyn EmbeddingExtractor>>,
    /// Serializes loading; holds the most recent load error.
    init: Mutex<Option<String>>,
    loader: Box<Loader>,
}

impl ExtractorHandle {
    /// Create a handle that loads lazily on first use.
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingExtractor>, FaceError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceLock::new(),
            init: Mutex::new(None),
            loader: Box::new(loader),
        }
    }

    /// Create a handle around an extractor that is already loaded.
    pub fn ready(extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        Self {
            cell: OnceLock::from(extractor),
            init: Mutex::new(None),
            loader: Box::new(|| -> Result<Arc<dyn EmbeddingExtractor>, FaceError> {
                Err(FaceError::Internal("preloaded extractor handle has no loader".into()))
            }),
        }
    }

    /// Borrow the extractor, loading it first if needed.
    pub fn get(&self) -> Result<&Arc<dyn EmbeddingExtractor>, FaceError> {
        if let Some(extractor) = self.cell.get() {
            return Ok(extractor);
        }

        let mut last_error = self
            .init
            .lock()
            .map_err(|_| FaceError::Internal("extractor init lock poisoned".into()))?;

        // Another caller may have finished loading while we waited.
        if let Some(extractor) = self.cell.get() {
            return Ok(extractor);
        }

        tracing::info!("loading embedding extractor");
        match (self.loader)() {
            Ok(extractor) => {
                *last_error = None;
                tracing::info!("embedding extractor ready");
                Ok(self.cell.get_or_init(|| extractor))
            }
            Err(e) => {
                tracing::error!(error = %e, "embedding extractor failed to load");
                let reason = e.to_string();
                *last_error = Some(reason.clone());
                Err(match e {
                    FaceError::ExtractorUnavailable(_) => e,
                    _ => FaceError::ExtractorUnavailable(reason),
                })
            }
        }
    }

    /// Current load state. Never blocks on an in-progress load.
    pub fn status(&self) -> ExtractorStatus {
        if self.cell.get().is_some() {
            return ExtractorStatus::Loaded;
        }
        match self.init.try_lock() {
            Ok(guard) => match guard.as_ref() {
                Some(err) => ExtractorStatus::Failed(err.clone()),
                None => ExtractorStatus::NotLoaded,
            },
            Err(TryLockError::WouldBlock) => ExtractorStatus::Loading,
            Err(TryLockError::Poisoned(_)) => {
                ExtractorStatus::Failed("extractor init lock poisoned".into())
            }
        }
    }
}

/// Turns extractor output into exactly one signature per image.
///
/// Uses the first (most confident) face, L2-normalizes its signature, and
/// reports zero faces as [`Extraction::NoFace`].
pub struct ExtractorAdapter {
    handle: ExtractorHandle,
    model_id: String,
    detector_id: String,
}

impl ExtractorAdapter {
    pub fn new(handle: ExtractorHandle) -> Self {
        Self::with_ids(handle, DEFAULT_MODEL_ID, DEFAULT_DETECTOR_ID)
    }

    pub fn with_ids(handle: ExtractorHandle, model_id: &str, detector_id: &str) -> Self {
        Self {
            handle,
            model_id: model_id.to_string(),
            detector_id: detector_id.to_string(),
        }
    }

    pub fn extract(&self, pixels: &PixelBuffer) -> Result<Extraction, FaceError> {
        let extractor = self.handle.get()?;
        let faces = extractor.represent(pixels, &self.model_id, &self.detector_id, false)?;
        tracing::debug!(faces = faces.len(), "extractor returned");

        let Some(face) = faces.into_iter().next() else {
            return Ok(Extraction::NoFace);
        };
        Ok(Extraction::Face(face.signature.l2_normalized()))
    }

    /// The extractor's own verification threshold. Loads the extractor if needed.
    pub fn native_threshold(&self) -> Result<f64, FaceError> {
        Ok(self.handle.get()?.native_threshold())
    }

    pub fn handle(&self) -> &ExtractorHandle {
        &self.handle
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic stand-in for a real model.
    ///
    /// An all-black image has no face. Otherwise the signature is the mean
    /// R, G, B of the image plus a constant bias, so identical pixels give
    /// identical signatures.
    pub(crate) struct StubExtractor;

    impl EmbeddingExtractor for StubExtractor {
        fn represent(
            &self,
            pixels: &PixelBuffer,
            _model_id: &str,
            _detector_id: &str,
            _enforce_detection: bool,
        ) -> Result<Vec<DetectedFace>, FaceError> {
            let raw = pixels.as_raw();
            if raw.iter().all(|&p| p == 0) {
                return Ok(Vec::new());
            }
            let n = (raw.len() / 3) as f32;
            let mut sums = [0.0f32; 3];
            for px in raw.chunks_exact(3) {
                for c in 0..3 {
                    sums[c] += px[c] as f32;
                }
            }
            let values = vec![sums[0] / n, sums[1] / n, sums[2] / n, 32.0];
            Ok(vec![DetectedFace {
                signature: Signature::new(values)?,
                region: None,
            }])
        }

        fn native_threshold(&self) -> f64 {
            0.68
        }
    }

    pub(crate) fn stub_adapter() -> ExtractorAdapter {
        ExtractorAdapter::new(ExtractorHandle::ready(Arc::new(StubExtractor)))
    }

    fn solid(rgb: [u8; 3]) -> PixelBuffer {
        let data = rgb.iter().copied().cycle().take(4 * 4 * 3).collect();
        PixelBuffer::from_rgb(data, 4, 4).unwrap()
    }

    #[test]
    fn test_no_face_is_an_outcome() {
        let adapter = stub_adapter();
        assert_eq!(adapter.extract(&solid([0, 0, 0])).unwrap(), Extraction::NoFace);
        assert!(matches!(
            Extraction::NoFace.into_signature(),
            Err(FaceError::NoFaceDetected)
        ));
    }

    #[test]
    fn test_signature_is_normalized() {
        let adapter = stub_adapter();
        let sig = adapter.extract(&solid([200, 10, 90])).unwrap().into_signature().unwrap();
        assert!((sig.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_repeat_extraction_same_dimensions() {
        let adapter = stub_adapter();
        let img = solid([120, 80, 40]);
        let a = adapter.extract(&img).unwrap().into_signature().unwrap();
        let b = adapter.extract(&img).unwrap().into_signature().unwrap();
        assert_eq!(a.dimensions(), b.dimensions());
        assert_eq!(a, b);
    }

    #[test]
    fn test_ready_handle_is_loaded() {
        let handle = ExtractorHandle::ready(Arc::new(StubExtractor));
        assert_eq!(handle.status(), ExtractorStatus::Loaded);
        assert_eq!(handle.get().unwrap().native_threshold(), 0.68);
    }

    #[test]
    fn test_lazy_handle_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let handle = ExtractorHandle::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubExtractor) as Arc<dyn EmbeddingExtractor>)
        });
        assert_eq!(handle.status(), ExtractorStatus::NotLoaded);

        let handle = Arc::new(handle);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                std::thread::spawn(move || h.get().map(|_| ()).is_ok())
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status(), ExtractorStatus::Loaded);
    }

    #[test]
    fn test_failed_load_reported_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let handle = ExtractorHandle::lazy(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FaceError::ExtractorUnavailable("model file missing".into()))
            } else {
                Ok(Arc::new(StubExtractor) as Arc<dyn EmbeddingExtractor>)
            }
        });

        assert!(matches!(handle.get(), Err(FaceError::ExtractorUnavailable(_))));
        assert!(matches!(handle.status(), ExtractorStatus::Failed(_)));

        assert!(handle.get().is_ok());
        assert_eq!(handle.status(), ExtractorStatus::Loaded);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_load_error_becomes_unavailable() {
        let handle = ExtractorHandle::lazy(|| Err(FaceError::Internal("ort init".into())));
        let adapter = ExtractorAdapter::new(handle);
        let img = solid([1, 2, 3]);
        assert!(matches!(
            adapter.extract(&img),
            Err(FaceError::ExtractorUnavailable(_))
        ));
    }
}
