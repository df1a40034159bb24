//! Image payload codec.
//!
//! Payloads are data URLs (`data:<mime>;base64,<data>`), the form photos
//! travel in at the edges (capture, export documents). Stored photos are
//! plain JPEG bytes. Everything here is a pure function.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::fmt;

use crate::error::{Error, Result};

pub const JPEG_MIME: &str = "image/jpeg";
const FALLBACK_MIME: &str = "application/octet-stream";

/// A decoded binary object and its media type.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("mime", &self.mime)
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .finish()
    }
}

impl Blob {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new(JPEG_MIME, bytes)
    }

    /// Wrap raw image file contents, sniffing the media type.
    pub fn from_image_bytes(bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Self::new(format.to_mime_type(), bytes))
    }
}

/// Sizing for thumbnails: fit inside `max_width` x `max_height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: f32,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            max_width: 150,
            max_height: 150,
            quality: 0.7,
        }
    }
}

/// Sizing for stored full images: both sides multiplied by `scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownscaleOptions {
    pub scale: f32,
    pub quality: f32,
}

impl Default for DownscaleOptions {
    fn default() -> Self {
        Self {
            scale: 0.7,
            quality: 0.7,
        }
    }
}

/// Parse a data URL into its binary object.
pub fn decode(payload: &str) -> Result<Blob> {
    let rest = payload
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| Error::Decode("payload is not a data URL".to_string()))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| Error::Decode("data URL has no data section".to_string()))?;
    let media = header
        .strip_suffix(";base64")
        .ok_or_else(|| Error::Decode("data URL is not base64 encoded".to_string()))?;

    let mime = media.split(';').next().unwrap_or_default();
    let mime = if mime.is_empty() { FALLBACK_MIME } else { mime };
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Decode(e.to_string()))?;

    Ok(Blob::new(mime, bytes))
}

/// Render a binary object as a data URL.
pub fn encode(blob: &Blob) -> String {
    format!("data:{};base64,{}", blob.mime, STANDARD.encode(&blob.bytes))
}

/// Scale a payload to fit the thumbnail box and re-encode it as JPEG.
pub fn thumbnail(payload: &str, options: ThumbnailOptions) -> Result<String> {
    let blob = decode(payload)?;
    let bytes = thumbnail_bytes(&blob.bytes, options)?;
    Ok(encode(&Blob::jpeg(bytes)))
}

/// Multiply both dimensions of a payload by the scale and re-encode it as
/// JPEG.
pub fn downscale(payload: &str, options: DownscaleOptions) -> Result<Blob> {
    let blob = decode(payload)?;
    Ok(Blob::jpeg(downscale_bytes(&blob.bytes, options)?))
}

pub fn thumbnail_bytes(bytes: &[u8], options: ThumbnailOptions) -> Result<Vec<u8>> {
    let img = load(bytes)?;
    let (width, height) = fit_within(
        img.width(),
        img.height(),
        options.max_width,
        options.max_height,
    );
    encode_jpeg(&resize(img, width, height), options.quality)
}

pub fn downscale_bytes(bytes: &[u8], options: DownscaleOptions) -> Result<Vec<u8>> {
    let img = load(bytes)?;
    let (width, height) = scale_by(img.width(), img.height(), options.scale);
    encode_jpeg(&resize(img, width, height), options.quality)
}

/// Pixel dimensions of encoded image bytes.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let img = load(bytes)?;
    Ok((img.width(), img.height()))
}

fn load(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))
}

fn resize(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.width() == width && img.height() == height {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    }
}

/// Largest size with the same aspect ratio that fits the box. Never
/// enlarges, never returns a zero side.
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width.max(1), height.max(1));
    }
    let (w, h) = (width as u64, height as u64);
    let (max_w, max_h) = (max_width.max(1) as u64, max_height.max(1) as u64);
    if w * max_h >= h * max_w {
        (max_w as u32, round_ratio(h, max_w, w).clamp(1, max_h) as u32)
    } else {
        (round_ratio(w, max_h, h).clamp(1, max_w) as u32, max_h as u32)
    }
}

/// `value * num / den`, rounded half up.
fn round_ratio(value: u64, num: u64, den: u64) -> u64 {
    (2 * value * num + den) / (2 * den)
}

fn scale_by(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let scale = scale as f64;
    (
        clamp_side(width as f64 * scale, u32::MAX),
        clamp_side(height as f64 * scale, u32::MAX),
    )
}

fn clamp_side(value: f64, max: u32) -> u32 {
    (value.round() as u32).clamp(1, max.max(1))
}

fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

fn encode_jpeg(img: &DynamicImage, quality: f32) -> Result<Vec<u8>> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality));
    rgb.write_with_encoder(encoder)?;
    Ok(buf)
}
