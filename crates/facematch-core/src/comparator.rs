//! Cosine comparison of face signatures.

use crate::error::FaceError;
use crate::types::Signature;

/// Cosine similarity in [-1, 1]. Higher = more similar.
///
/// A zero-norm operand yields 0.0 instead of dividing by zero.
pub fn similarity(a: &Signature, b: &Signature) -> Result<f32, FaceError> {
    if a.dimensions() != b.dimensions() {
        return Err(FaceError::DimensionMismatch {
            left: a.dimensions(),
            right: b.dimensions(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.values().iter().zip(b.values()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    Ok(if denom > 0.0 { dot / denom } else { 0.0 })
}

/// Cosine distance `1 - similarity`, in [0, 2]. Lower = more similar.
///
/// Clamped so rounding noise on near-identical signatures never reports a
/// negative distance (or a confidence above 100%).
pub fn distance(a: &Signature, b: &Signature) -> Result<f32, FaceError> {
    Ok((1.0 - similarity(a, b)?).clamp(0.0, 2.0))
}
