use thiserror::Error;

use crate::decode::DecodeError;
use crate::types::SignatureError;

/// Every failure the identity-matching pipeline can report.
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("missing required field: {0}")]
    MissingInput(&'static str),
    #[error("invalid image: {0}")]
    Decode(#[from] DecodeError),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("signature dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("no stored faces to compare")]
    EmptyGallery,
    #[error("invalid gallery: {0}")]
    InvalidGallery(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("embedding extractor unavailable: {0}")]
    ExtractorUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FaceError {
    /// True when the caller supplied something unusable, as opposed to a
    /// failure on our side.
    ///
    /// Comparison failures (`DimensionMismatch`) and bad extractor output
    /// (`InvalidSignature`) are server faults.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            FaceError::MissingInput(_)
                | FaceError::Decode(_)
                | FaceError::NoFaceDetected
                | FaceError::EmptyGallery
                | FaceError::InvalidGallery(_)
        )
    }

    /// Stable machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FaceError::MissingInput(_) => "missing_input",
            FaceError::Decode(_) => "decode_error",
            FaceError::NoFaceDetected => "no_face_detected",
            FaceError::DimensionMismatch { .. } => "dimension_mismatch",
            FaceError::EmptyGallery => "empty_gallery",
            FaceError::InvalidGallery(_) => "invalid_gallery",
            FaceError::InvalidSignature(_) => "invalid_signature",
            FaceError::ExtractorUnavailable(_) => "extractor_unavailable",
            FaceError::Internal(_) => "internal_error",
        }
    }
}
