use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("jpeg encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Tunable constants for the quality-then-dimension search. The two call
/// sites (local acquisition and remote upload) run the same procedure with
/// different numbers.
#[derive(Debug, Clone, Copy)]
pub struct CompressionProfile {
    /// Quality for the first encode attempt.
    pub start_quality: u8,
    /// Quality after each dimension reduction.
    pub retry_quality: u8,
    /// Lowest quality tried before dimensions are reduced instead.
    pub floor_quality: u8,
    /// Step subtracted from quality per attempt.
    pub quality_step: u8,
    /// Factor applied to both dimensions when quality alone is not enough.
    pub downscale: f32,
    /// Stop downscaling once the smaller dimension would drop below this.
    pub min_dimension: u32,
}

/// Profile for images saved to the local scratch folder.
pub const ACQUISITION_PROFILE: CompressionProfile = CompressionProfile {
    start_quality: 90,
    retry_quality: 80,
    floor_quality: 25,
    quality_step: 5,
    downscale: 0.8,
    min_dimension: 300,
};

/// Profile for the upload sweep; steps harder and tolerates smaller output.
pub const UPLOAD_PROFILE: CompressionProfile = CompressionProfile {
    start_quality: 95,
    retry_quality: 85,
    floor_quality: 10,
    quality_step: 15,
    downscale: 0.8,
    min_dimension: 100,
};

#[derive(Debug, Clone)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub dimensions: (u32, u32),
    /// False when minimum dimensions were hit before the budget was met; the
    /// bytes are the best (oversized) result achievable under the profile.
    pub within_budget: bool,
}

/// Deterministically shrink an image to `max_bytes` of JPEG.
///
/// Color mode is normalized to RGB, then quality steps down from
/// `start_quality` to `floor_quality`; once the floor is hit with the budget
/// still exceeded, both dimensions shrink by `downscale` and quality resets
/// to `retry_quality`, until either the budget is met or the smaller
/// dimension would fall below `min_dimension`.
pub fn compress_to_budget(
    image: &DynamicImage,
    max_bytes: usize,
    profile: &CompressionProfile,
) -> Result<Compressed, CompressError> {
    let step = profile.quality_step.max(1);
    let downscale = profile.downscale.clamp(0.1, 0.95);
    let min_dimension = profile.min_dimension.max(1);

    let mut working = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut quality = profile.start_quality.max(profile.floor_quality);

    loop {
        let bytes = encode_jpeg(&working, quality)?;
        if bytes.len() <= max_bytes {
            return Ok(Compressed {
                bytes,
                quality,
                dimensions: working.dimensions(),
                within_budget: true,
            });
        }

        if quality > profile.floor_quality {
            quality = quality.saturating_sub(step).max(profile.floor_quality);
            continue;
        }

        let (width, height) = working.dimensions();
        let new_width = (width as f32 * downscale) as u32;
        let new_height = (height as f32 * downscale) as u32;
        if new_width.min(new_height) < min_dimension {
            debug!(
                target = "bodega.compress",
                size = bytes.len(),
                width,
                height,
                "budget unreachable; accepting oversized result"
            );
            return Ok(Compressed {
                bytes,
                quality,
                dimensions: (width, height),
                within_budget: false,
            });
        }
        working = working.resize_exact(new_width, new_height, FilterType::Lanczos3);
        quality = profile.retry_quality.max(profile.floor_quality);
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CompressError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode_image(image)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// High-entropy image so JPEG actually has to work for its budget.
    fn noisy_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17)) as u8;
            Rgb([v, v.wrapping_add(85), v.wrapping_add(170)])
        }))
    }

    #[test]
    fn generous_budget_keeps_start_quality_and_dimensions() {
        let img = noisy_image(64, 64);
        let out = compress_to_budget(&img, 10 * 1024 * 1024, &ACQUISITION_PROFILE).unwrap();
        assert!(out.within_budget);
        assert_eq!(out.quality, ACQUISITION_PROFILE.start_quality);
        assert_eq!(out.dimensions, (64, 64));
    }

    #[test]
    fn tight_budget_terminates_and_meets_or_flags() {
        let img = noisy_image(800, 600);
        let budget = 30 * 1024;
        let out = compress_to_budget(&img, budget, &ACQUISITION_PROFILE).unwrap();
        if out.within_budget {
            assert!(out.bytes.len() <= budget);
        } else {
            // minimum-dimension stop: result is the documented oversized state
            assert!(out.dimensions.0.min(out.dimensions.1) >= 1);
        }
    }

    #[test]
    fn impossible_budget_stops_at_minimum_dimensions() {
        let img = noisy_image(1000, 1000);
        let out = compress_to_budget(&img, 10, &UPLOAD_PROFILE).unwrap();
        assert!(!out.within_budget);
        assert!(out.bytes.len() > 10);
        assert_eq!(out.quality, UPLOAD_PROFILE.floor_quality);
        // stopped before shrinking past the minimum
        let next_min = (out.dimensions.0.min(out.dimensions.1) as f32 * 0.8) as u32;
        assert!(next_min < UPLOAD_PROFILE.min_dimension);
    }

    #[test]
    fn procedure_is_deterministic() {
        let img = noisy_image(400, 300);
        let a = compress_to_budget(&img, 8 * 1024, &ACQUISITION_PROFILE).unwrap();
        let b = compress_to_budget(&img, 8 * 1024, &ACQUISITION_PROFILE).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.quality, b.quality);
        assert_eq!(a.dimensions, b.dimensions);
    }

    #[test]
    fn rgba_input_is_normalized_before_encoding() {
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            32,
            32,
            image::Rgba([10, 20, 30, 128]),
        ));
        let out = compress_to_budget(&rgba, 1024 * 1024, &UPLOAD_PROFILE).unwrap();
        assert!(out.within_budget);
        assert!(image::load_from_memory(&out.bytes).is_ok());
    }
}
