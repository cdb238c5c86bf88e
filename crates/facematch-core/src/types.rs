use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// A decoded RGB image: `width * height * 3` interleaved samples, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    pub const CHANNELS: usize = 3;

    /// Wrap interleaved RGB samples. Returns `None` when the length does not
    /// match `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if data.len() != width as usize * height as usize * Self::CHANNELS {
            return None;
        }
        Some(Self { data, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw interleaved RGB samples.
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// RGB sample at (x, y). Caller guarantees the coordinate is in bounds.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let off = (y * self.width as usize + x) * Self::CHANNELS;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }
}

impl From<image::RgbImage> for PixelBuffer {
    fn from(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }
}

/// Why a vector was refused as a [`Signature`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature is empty")]
    Empty,
    #[error("signature contains non-finite values")]
    NonFinite,
}

/// Face signature (embedding) vector, 512-dimensional for ArcFace.
///
/// Always non-empty with finite components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Result<Self, SignatureError> {
        if values.is_empty() {
            return Err(SignatureError::Empty);
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SignatureError::NonFinite);
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimensions(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Scale to unit length. Zero-norm signatures are returned unchanged.
    pub fn l2_normalized(self) -> Self {
        let norm = self.norm();
        if norm > 0.0 {
            Self {
                values: self.values.iter().map(|x| x / norm).collect(),
            }
        } else {
            self
        }
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

impl TryFrom<Vec<f32>> for Signature {
    type Error = SignatureError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Signature> for Vec<f32> {
    fn from(sig: Signature) -> Self {
        sig.values
    }
}

/// An enrolled identity supplied by the caller for one match request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    #[serde(rename = "userId")]
    pub identity_id: String,
    #[serde(rename = "name", default)]
    pub display_name: String,
    #[serde(rename = "encoding")]
    pub signature: Signature,
}

/// Outcome of matching one captured signature against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub accepted: bool,
    /// The winning entry; only set when `accepted`.
    pub best_entry: Option<GalleryEntry>,
    /// Cosine distance of the closest entry, rounded to 4 decimals.
    pub distance: f64,
    /// `(1 - distance) * 100`, rounded to 1 decimal.
    pub confidence_percent: f64,
}

/// Outcome of a one-to-one comparison of two images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerificationDecision {
    pub verified: bool,
    /// Rounded to 4 decimals.
    pub distance: f64,
    pub threshold: f64,
}

/// Round to `places` decimal digits.
///
/// Reported values are `f64` so they serialize as the rounded decimal; an
/// `f32` widened on output would print as e.g. `0.550000011920929`.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
