//! Turns request bytes into a decoded page.
//!
//! Accepted inputs: raw image containers (anything the `image` build can read),
//! base64 text of one, or a `data:<mime>;base64,` URI when the caller allows it.

use std::io::Cursor;

use base64::{Engine, engine::general_purpose};
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use tracing::debug;

use crate::config::DecoderConfig;
use crate::error::{Result, SegmentError};

/// A decoded page and the container it came from
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 1 = gray, 2 = gray+alpha, 3 = RGB, 4 = RGBA
    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }
}

/// Decode `bytes` into a page, enforcing the configured size limits
pub fn decode_image(bytes: &[u8], allow_data_uri: bool, config: &DecoderConfig) -> Result<DecodedImage> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(SegmentError::Decode("input is empty".to_string()));
    }
    if bytes.len() > config.max_input_bytes {
        return Err(SegmentError::Decode(format!(
            "input is {} bytes, limit is {}",
            bytes.len(),
            config.max_input_bytes
        )));
    }

    let raw = unwrap_container_bytes(bytes, allow_data_uri)?;
    let format = image::guess_format(&raw)
        .map_err(|_| SegmentError::Decode("unrecognized image container".to_string()))?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(config.max_width);
    limits.max_image_height = Some(config.max_height);

    let mut reader = ImageReader::with_format(Cursor::new(raw.as_slice()), format);
    reader.limits(limits);
    // Reading from memory, so any failure here is about the data itself
    let image = reader
        .decode()
        .map_err(|e| SegmentError::Decode(e.to_string()))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(SegmentError::Decode(format!(
            "image has zero dimension ({}x{})",
            image.width(),
            image.height()
        )));
    }

    debug!(
        format = ?format,
        width = image.width(),
        height = image.height(),
        channels = image.color().channel_count(),
        "decoded page"
    );
    Ok(DecodedImage { image, format })
}

/// Peel off a data-URI header and/or base64 layer, returning container bytes
fn unwrap_container_bytes(bytes: &[u8], allow_data_uri: bool) -> Result<Vec<u8>> {
    let trimmed = trim_ascii_whitespace(bytes);

    if trimmed.len() >= 5 && trimmed[..5].eq_ignore_ascii_case(b"data:") {
        if !allow_data_uri {
            return Err(SegmentError::Decode("data URI input is not allowed".to_string()));
        }
        let comma = trimmed
            .iter()
            .position(|b| *b == b',')
            .ok_or_else(|| SegmentError::Decode("data URI has no payload".to_string()))?;
        let header = String::from_utf8_lossy(&trimmed[..comma]).to_lowercase();
        if !header.ends_with(";base64") {
            return Err(SegmentError::Decode(format!(
                "only base64 data URIs are supported, got '{}'",
                header
            )));
        }
        return decode_base64(&trimmed[comma + 1..]);
    }

    // Raw containers are taken as-is
    if image::guess_format(bytes).is_ok() {
        return Ok(bytes.to_vec());
    }

    decode_base64(trimmed)
}

fn decode_base64(text: &[u8]) -> Result<Vec<u8>> {
    // Line-wrapped base64 is common in pasted payloads
    let compact: Vec<u8> = text.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(SegmentError::Decode("base64 payload is empty".to_string()));
    }
    general_purpose::STANDARD
        .decode(&compact)
        .map_err(|e| SegmentError::Decode(format!("input is neither an image nor base64: {}", e)))
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}
