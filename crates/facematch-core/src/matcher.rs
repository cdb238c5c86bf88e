//! Gallery matching: find the enrolled identity closest to a captured face.

use std::collections::HashSet;

use crate::comparator;
use crate::error::FaceError;
use crate::types::{round_to, GalleryEntry, MatchDecision, Signature};

/// Default acceptance threshold (cosine distance) for gallery matches.
///
/// Independent of the extractor's native verification threshold, which is
/// only used for one-to-one verification.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.40;

/// Strategy for comparing a captured signature against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        captured: &Signature,
        gallery: &[GalleryEntry],
    ) -> Result<MatchDecision, FaceError>;
}

/// Nearest-neighbour matcher over cosine distance.
///
/// Scans every entry in gallery order; the first entry seen at the minimum
/// distance wins ties. Accepts iff that distance is strictly below `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub threshold: f64,
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        captured: &Signature,
        gallery: &[GalleryEntry],
    ) -> Result<MatchDecision, FaceError> {
        if gallery.is_empty() {
            return Err(FaceError::EmptyGallery);
        }

        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let distance = comparator::distance(captured, &entry.signature)?;
            // Strict: an equal distance later in the gallery never replaces the first.
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        // Signatures are finite, so every distance is in [0, 2] and a
        // non-empty gallery always yields a best entry.
        let idx = best_idx.ok_or_else(|| {
            FaceError::Internal("no comparable gallery entry".into())
        })?;

        let best_distance = f64::from(best_distance);
        let accepted = best_distance < self.threshold;
        tracing::debug!(
            gallery_size = gallery.len(),
            best_index = idx,
            distance = best_distance,
            threshold = self.threshold,
            accepted,
            "gallery scan complete"
        );

        Ok(MatchDecision {
            accepted,
            best_entry: accepted.then(|| gallery[idx].clone()),
            distance: round_to(best_distance, 4),
            confidence_percent: round_to((1.0 - best_distance) * 100.0, 1),
        })
    }
}

/// Reject galleries that cannot be matched against meaningfully: empty,
/// blank or duplicate identity ids.
pub fn validate_gallery(gallery: &[GalleryEntry]) -> Result<(), FaceError> {
    if gallery.is_empty() {
        return Err(FaceError::EmptyGallery);
    }

    let mut seen = HashSet::with_capacity(gallery.len());
    for (i, entry) in gallery.iter().enumerate() {
        if entry.identity_id.trim().is_empty() {
            return Err(FaceError::InvalidGallery(format!(
                "entry {i} has an empty userId"
            )));
        }
        if !seen.insert(entry.identity_id.as_str()) {
            return Err(FaceError::InvalidGallery(format!(
                "duplicate userId '{}'",
                entry.identity_id
            )));
        }
    }
    Ok(())
}
