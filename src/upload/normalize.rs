//! Best-effort image normalization
//!
//! Downscales an image so its longest edge fits `max_dimension` and
//! re-encodes it as baseline JPEG. Any failure, including a timeout, falls
//! back to the original bytes; callers never see an error.

use super::{NormalizedAsset, UploadCandidate};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Mime type of a successfully normalized asset
pub const NORMALIZED_MIME_TYPE: &str = "image/jpeg";

/// Normalization errors. Internal: they only decide the fallback.
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Normalization task failed: {0}")]
    Task(String),
}

/// Normalization parameters
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub max_dimension: u32,
    /// Encoder quality in `0.0..=1.0`
    pub quality: f32,
    pub timeout: Duration,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1920,
            quality: 0.8,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Uniform scale factor that fits both edges under `max_dimension`.
///
/// Clamped to 1.0: small images are never upscaled.
pub fn scale_factor(width: u32, height: u32, max_dimension: u32) -> f64 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    let max = f64::from(max_dimension);
    (max / f64::from(width))
        .min(max / f64::from(height))
        .min(1.0)
}

/// Decode, downscale and re-encode synchronously
pub fn reencode(data: &[u8], max_dimension: u32, quality: f32) -> Result<Vec<u8>, NormalizeError> {
    let img = image::load_from_memory(data)?;
    let (width, height) = img.dimensions();

    let factor = scale_factor(width, height, max_dimension);
    let img = if factor < 1.0 {
        let target_w = ((f64::from(width) * factor).round() as u32).max(1);
        let target_h = ((f64::from(height) * factor).round() as u32).max(1);
        img.resize_exact(target_w, target_h, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let quality = (quality.clamp(0.01, 1.0) * 100.0).round() as u8;

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

/// Normalize a candidate, falling back to its original bytes on any failure
pub async fn normalize(candidate: &UploadCandidate, options: &NormalizeOptions) -> NormalizedAsset {
    let data = candidate.raw_bytes.clone();
    let max_dimension = options.max_dimension;
    let quality = options.quality;

    let job = async move {
        tokio::task::spawn_blocking(move || reencode(&data, max_dimension, quality))
            .await
            .map_err(|e| NormalizeError::Task(e.to_string()))?
    };

    normalize_with(candidate, options.timeout, job).await
}

/// Apply the fallback rules to an arbitrary encoding job
pub(crate) async fn normalize_with<F>(candidate: &UploadCandidate, timeout: Duration, job: F) -> NormalizedAsset
where
    F: Future<Output = Result<Vec<u8>, NormalizeError>>,
{
    match tokio::time::timeout(timeout, job).await {
        Ok(Ok(encoded)) if encoded.len() < candidate.raw_bytes.len() => {
            tracing::debug!(
                file = %candidate.name,
                original_bytes = candidate.raw_bytes.len(),
                normalized_bytes = encoded.len(),
                "Image normalized"
            );
            NormalizedAsset {
                name: candidate.name.clone(),
                mime_type: NORMALIZED_MIME_TYPE.to_string(),
                byte_length: encoded.len() as u64,
                encoded_bytes: Bytes::from(encoded),
            }
        }
        Ok(Ok(encoded)) => {
            tracing::debug!(
                file = %candidate.name,
                original_bytes = candidate.raw_bytes.len(),
                normalized_bytes = encoded.len(),
                "Normalized output not smaller, keeping original"
            );
            NormalizedAsset::passthrough(candidate)
        }
        Ok(Err(e)) => {
            tracing::warn!(file = %candidate.name, error = %e, "Normalization failed, using original");
            NormalizedAsset::passthrough(candidate)
        }
        Err(_) => {
            tracing::warn!(
                file = %candidate.name,
                timeout_ms = timeout.as_millis() as u64,
                "Normalization timed out, using original"
            );
            NormalizedAsset::passthrough(candidate)
        }
    }
}
