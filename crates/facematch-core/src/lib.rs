//! facematch-core: face identity matching.
//!
//! Decodes transport images, turns faces into signatures (SCRFD detection
//! and ArcFace recognition via ONNX Runtime), and matches them against a
//! caller-supplied gallery by cosine distance.

pub mod alignment;
pub mod comparator;
pub mod decode;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod onnx;
pub mod pipeline;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use decode::{DecodeError, DEFAULT_MAX_PAYLOAD_BYTES};
pub use error::FaceError;
pub use extractor::{
    DetectedFace, EmbeddingExtractor, Extraction, ExtractorAdapter, ExtractorHandle,
    ExtractorStatus,
};
pub use matcher::{CosineMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use onnx::OnnxExtractor;
pub use pipeline::{FacePipeline, MatchConfig};
pub use types::{
    BoundingBox, GalleryEntry, MatchDecision, PixelBuffer, Signature, SignatureError,
    VerificationDecision,
};

/// Default ONNX model directory: `$XDG_DATA_HOME/facematch/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch/models")
}
