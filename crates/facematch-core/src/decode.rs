//! Transport payload → RGB pixel buffer.
//!
//! Accepts bare base64 or a data URL (`data:image/png;base64,<payload>`).
//! Any raster format the `image` crate can sniff is accepted; grayscale and
//! RGBA sources are converted to RGB.

use std::borrow::Cow;

use crate::types::PixelBuffer;
use base64::Engine;
use thiserror::Error;

/// Upper bound on the encoded payload size (50 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 50 * 1024 * 1024;

const DATA_URL_PREFIX: &str = "data:";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("malformed data URL: missing ',' separator")]
    MalformedDataUrl,
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a base64 or data-URL image payload into an RGB pixel buffer.
pub fn decode_image(payload: &str, max_bytes: usize) -> Result<PixelBuffer, DecodeError> {
    if payload.len() > max_bytes {
        return Err(DecodeError::TooLarge {
            size: payload.len(),
            max: max_bytes,
        });
    }

    let b64 = strip_data_url(payload.trim())?;
    if b64.is_empty() {
        return Err(DecodeError::Empty);
    }

    let b64 = strip_whitespace(b64);
    let bytes = base64::engine::general_purpose::STANDARD.decode(b64.as_bytes())?;
    decode_bytes(&bytes, max_bytes)
}

/// Line-wrapped base64 (MIME, PEM style) carries newlines the decoder rejects.
fn strip_whitespace(b64: &str) -> Cow<'_, str> {
    if b64.bytes().any(|b| b.is_ascii_whitespace()) {
        Cow::Owned(b64.chars().filter(|c| !c.is_ascii_whitespace()).collect())
    } else {
        Cow::Borrowed(b64)
    }
}

/// Decode raw encoded image bytes (PNG, JPEG, ...) into an RGB pixel buffer.
pub fn decode_bytes(bytes: &[u8], max_bytes: usize) -> Result<PixelBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    let img = image::load_from_memory(bytes)?;
    let rgb = img.to_rgb8();
    tracing::debug!(width = rgb.width(), height = rgb.height(), "decoded image");
    Ok(PixelBuffer::from(rgb))
}

/// Return the base64 portion of a data URL, or the input unchanged.
fn strip_data_url(payload: &str) -> Result<&str, DecodeError> {
    if !payload.starts_with(DATA_URL_PREFIX) {
        return Ok(payload);
    }
    payload
        .split_once(',')
        .map(|(_, data)| data)
        .ok_or(DecodeError::MalformedDataUrl)
}
