//! End-to-end operations: payload → pixels → signature → decision.
//!
//! Input validation (gallery shape, payload decoding) runs before the
//! extractor is touched.

use crate::comparator;
use crate::decode::{self, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::error::FaceError;
use crate::extractor::{ExtractorAdapter, ExtractorStatus};
use crate::matcher::{self, CosineMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::types::{round_to, GalleryEntry, MatchDecision, PixelBuffer, Signature, VerificationDecision};

/// Tunables for matching and decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Gallery acceptance threshold (cosine distance, strict `<`).
    pub match_threshold: f64,
    /// Verification threshold; `None` uses the extractor's native value.
    pub verify_threshold: Option<f64>,
    pub max_payload_bytes: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            verify_threshold: None,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

pub struct FacePipeline {
    adapter: ExtractorAdapter,
    config: MatchConfig,
}

impl FacePipeline {
    pub fn new(adapter: ExtractorAdapter, config: MatchConfig) -> Self {
        Self { adapter, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Load the extractor now instead of on the first request.
    pub fn preload(&self) -> Result<(), FaceError> {
        self.adapter.handle().get().map(|_| ())
    }

    pub fn extractor_status(&self) -> ExtractorStatus {
        self.adapter.handle().status()
    }

    /// Signature of the first face in `image`.
    pub fn encode(&self, image: &str) -> Result<Signature, FaceError> {
        tracing::info!(len = image.len(), "encode request");
        let pixels = self.decode(image)?;
        let signature = self.signature_of(&pixels)?;
        tracing::info!(dims = signature.dimensions(), "encode: success");
        Ok(signature)
    }

    /// Identify the face in `captured` among `gallery`.
    pub fn match_face(
        &self,
        captured: &str,
        gallery: &[GalleryEntry],
    ) -> Result<MatchDecision, FaceError> {
        tracing::info!(len = captured.len(), gallery_size = gallery.len(), "match request");
        matcher::validate_gallery(gallery)?;
        let pixels = self.decode(captured)?;
        let signature = self.signature_of(&pixels)?;

        let decision = CosineMatcher {
            threshold: self.config.match_threshold,
        }
        .compare(&signature, gallery)?;

        match &decision.best_entry {
            Some(entry) => tracing::info!(
                user_id = %entry.identity_id,
                distance = decision.distance,
                "match: accepted"
            ),
            None => tracing::info!(best_distance = decision.distance, "match: not recognized"),
        }
        Ok(decision)
    }

    /// Decide whether two images show the same person.
    pub fn verify(&self, image1: &str, image2: &str) -> Result<VerificationDecision, FaceError> {
        tracing::info!(len1 = image1.len(), len2 = image2.len(), "verify request");
        let first = self.decode(image1)?;
        let second = self.decode(image2)?;

        let a = self.signature_of(&first)?;
        let b = self.signature_of(&second)?;

        let threshold = match self.config.verify_threshold {
            Some(t) => t,
            None => self.adapter.native_threshold()?,
        };
        let distance = f64::from(comparator::distance(&a, &b)?);
        let decision = VerificationDecision {
            verified: distance < threshold,
            distance: round_to(distance, 4),
            threshold,
        };
        tracing::info!(
            verified = decision.verified,
            distance = decision.distance,
            threshold,
            "verify: done"
        );
        Ok(decision)
    }

    fn decode(&self, payload: &str) -> Result<PixelBuffer, FaceError> {
        Ok(decode::decode_image(payload, self.config.max_payload_bytes)?)
    }

    fn signature_of(&self, pixels: &PixelBuffer) -> Result<Signature, FaceError> {
        self.adapter.extract(pixels)?.into_signature()
    }
}
