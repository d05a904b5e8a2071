//! Noise extraction — deterministic image→bytes reducers.
//!
//! One frame fans out through four independent reducers whose outputs are
//! concatenated into a single raw noise buffer:
//!
//! 1. per-channel Laplacian ([`laplacian`])
//! 2. FFT high-pass over luminance ([`spectral`])
//! 3. Sobel gradient magnitude over luminance ([`gradient`])
//! 4. randomly placed luminance windows, each Laplacian-reduced ([`regions`])
//!
//! The goal is a long stream that carries per-pixel variation, not uniform
//! output — whitening is the conditioner's job and no XOR mixing happens
//! here. Reducing the stream with XOR was measured to destroy entropy and is
//! not allowed in this module.

pub mod gradient;
pub mod laplacian;
pub mod regions;
pub mod spectral;

use image::DynamicImage;
use thiserror::Error;

use crate::config::Config;
use crate::frame::Frame;

/// Error from noise extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The frame bytes could not be decoded as an image.
    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// A single image channel as `f64` samples in row-major order.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub px: Vec<f64>,
}

impl Plane {
    pub fn new(width: usize, height: usize, px: Vec<f64>) -> Self {
        debug_assert_eq!(px.len(), width * height);
        Self { width, height, px }
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f64 {
        self.px[y * self.width + x]
    }

    /// Sample with edge replication, for kernels that read past the border.
    #[inline]
    pub fn at_clamped(&self, x: isize, y: isize) -> f64 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.at(x, y)
    }
}

/// Min-max normalize samples to the full byte range.
///
/// A flat plane (max == min) is passed through as clamped casts so constant
/// regions stay constant instead of being stretched into fake contrast.
pub(crate) fn minmax_to_bytes(values: &[f64]) -> Vec<u8> {
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if hi > lo {
        let span = hi - lo;
        values
            .iter()
            .map(|&v| ((v - lo) / span * 255.0) as u8)
            .collect()
    } else {
        values.iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect()
    }
}

/// Normalize non-negative samples by their maximum.
pub(crate) fn max_to_bytes(values: &[f64]) -> Vec<u8> {
    let hi = values.iter().fold(0.0_f64, |m, &v| m.max(v));
    if hi > 0.0 {
        values.iter().map(|&v| (v / hi * 255.0) as u8).collect()
    } else {
        vec![0u8; values.len()]
    }
}

/// Split a decoded image into its color channels (single plane if grayscale).
pub(crate) fn channel_planes(img: &DynamicImage) -> Vec<Plane> {
    if img.color().channel_count() >= 3 {
        let rgb = img.to_rgb8();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        (0..3)
            .map(|c| {
                let px = rgb.pixels().map(|p| p.0[c] as f64).collect();
                Plane::new(w, h, px)
            })
            .collect()
    } else {
        vec![luma_plane(img)]
    }
}

/// Grayscale plane of the image.
pub(crate) fn luma_plane(img: &DynamicImage) -> Plane {
    let gray = img.to_luma8();
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let px = gray.as_raw().iter().map(|&v| v as f64).collect();
    Plane::new(w, h, px)
}

/// Image→raw-noise reducer.
///
/// Stateless apart from its tuning knobs; safe to share across threads.
#[derive(Debug, Clone)]
pub struct NoiseExtractor {
    cutoff_ratio: f64,
    region_count: usize,
    region_size: u32,
}

impl Default for NoiseExtractor {
    fn default() -> Self {
        Self {
            cutoff_ratio: 0.8,
            region_count: 5,
            region_size: 32,
        }
    }
}

impl NoiseExtractor {
    pub fn new(cutoff_ratio: f64, region_count: usize, region_size: u32) -> Self {
        Self {
            cutoff_ratio,
            region_count,
            region_size,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.cutoff_ratio, cfg.region_count, cfg.region_size)
    }

    /// Decode a frame and extract raw noise from it.
    pub fn extract(&self, frame: &Frame) -> Result<Vec<u8>, ExtractError> {
        let img = image::load_from_memory(&frame.bytes)?;
        Ok(self.extract_image(&img))
    }

    /// Run every reducer over a decoded image and concatenate the outputs.
    pub fn extract_image(&self, img: &DynamicImage) -> Vec<u8> {
        let mut noise = Vec::new();

        for channel in channel_planes(img) {
            noise.extend(laplacian::extract(&channel));
        }

        let luma = luma_plane(img);
        noise.extend(spectral::extract(&luma, self.cutoff_ratio));
        noise.extend(gradient::extract(&luma));

        for window in regions::sample(&luma, self.region_count, self.region_size as usize) {
            noise.extend(laplacian::extract(&window));
        }

        log::debug!(
            "extracted {} raw noise bytes from {}x{} image",
            noise.len(),
            img.width(),
            img.height()
        );
        noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, RgbImage};

    fn gradient_gray(w: u32, h: u32) -> DynamicImage {
        let img = GrayImage::from_fn(w, h, |x, y| image::Luma([((x * 7 + y * 13) % 256) as u8]));
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn extract_concatenates_all_reducers() {
        let img = gradient_gray(64, 64);
        let noise = NoiseExtractor::default().extract_image(&img);
        // 1 channel Laplacian + FFT + gradient (64*64 each) + 5 windows of 32*32.
        assert_eq!(noise.len(), 3 * 64 * 64 + 5 * 32 * 32);
    }

    #[test]
    fn color_images_contribute_three_channel_planes() {
        let rgb = RgbImage::from_fn(48, 48, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let noise = NoiseExtractor::default().extract_image(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(noise.len(), 5 * 48 * 48 + 5 * 32 * 32);
    }

    #[test]
    fn zero_frame_extracts_all_zero_noise() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(64, 64));
        let noise = NoiseExtractor::default().extract_image(&img);
        assert!(!noise.is_empty());
        assert!(noise.iter().all(|&b| b == 0));
    }

    #[test]
    fn undecodable_frame_is_a_decode_error() {
        let frame = Frame::new(vec![0xde, 0xad, 0xbe, 0xef], "test/garbage");
        let err = NoiseExtractor::default().extract(&frame);
        assert!(matches!(err, Err(ExtractError::Decode(_))));
    }

    #[test]
    fn minmax_stretches_full_range() {
        let bytes = minmax_to_bytes(&[10.0, 20.0, 30.0]);
        assert_eq!(bytes, vec![0, 127, 255]);
    }

    #[test]
    fn flat_plane_is_not_stretched() {
        let bytes = minmax_to_bytes(&[42.0, 42.0, 42.0]);
        assert_eq!(bytes, vec![42, 42, 42]);
    }
}
