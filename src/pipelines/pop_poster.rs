//! Pop Poster: k-means posterization with bold black contours.
//!
//! Steps:
//! 1. Seeded k-means over RGB, every pixel replaced by its rounded centroid
//! 2. Canny-style edges on the posterized luminance (smooth, Sobel,
//!    non-maximum suppression, hysteresis over the 8-neighborhood)
//! 3. Edge pixels forced to pure black
//! 4. Unsharp mask

use garde::Validate;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::config::positive;
use super::filters::{self, Gradients, Plane};
use super::{flatten_to_rgb, kmeans, PipelineError, RenderAlgorithm};

/// Gaussian sigma of the pre-edge smoothing pass.
const EDGE_SMOOTHING_SIGMA: f32 = 1.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PopPosterConfig {
    #[garde(range(min = 1, max = 256))]
    pub clusters: u32,

    #[garde(skip)]
    pub seed: u64,

    #[garde(range(min = 0.0))]
    pub edge_low: f32,

    #[garde(range(min = 0.0))]
    pub edge_high: f32,

    #[garde(custom(positive))]
    pub sharpen_radius: f32,

    /// Percent of the high-frequency detail added back.
    #[garde(range(min = 0.0))]
    pub sharpen_amount: f32,

    #[garde(range(max = 255))]
    pub sharpen_threshold: u32,
}

impl Default for PopPosterConfig {
    fn default() -> Self {
        Self {
            clusters: 8,
            seed: 42,
            edge_low: 50.0,
            edge_high: 150.0,
            sharpen_radius: 2.0,
            sharpen_amount: 150.0,
            sharpen_threshold: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PopPoster {
    config: PopPosterConfig,
}

impl RenderAlgorithm for PopPoster {
    type Config = PopPosterConfig;

    fn from_config(config: PopPosterConfig) -> Result<Self, PipelineError> {
        if config.edge_low > config.edge_high {
            return Err(PipelineError::InvalidConfiguration(format!(
                "edge_low ({}) must not exceed edge_high ({})",
                config.edge_low, config.edge_high
            )));
        }
        Ok(Self { config })
    }

    fn config(&self) -> &PopPosterConfig {
        &self.config
    }

    fn render(&self, image: &DynamicImage) -> Result<DynamicImage, PipelineError> {
        let composite = self.composite(image)?;
        tracing::debug!(
            radius = self.config.sharpen_radius,
            amount = self.config.sharpen_amount,
            "Sharpening"
        );
        Ok(DynamicImage::ImageRgb8(self.sharpen(&composite)))
    }
}

impl PopPoster {
    /// Posterized image with black edges, before sharpening.
    pub fn composite(&self, image: &DynamicImage) -> Result<RgbImage, PipelineError> {
        let rgb = flatten_to_rgb(image);
        let pixel_count = rgb.width() as u64 * rgb.height() as u64;
        if self.config.clusters as u64 > pixel_count {
            return Err(PipelineError::InvalidConfiguration(format!(
                "clusters ({}) exceeds pixel count ({})",
                self.config.clusters, pixel_count
            )));
        }

        tracing::debug!(clusters = self.config.clusters, seed = self.config.seed, "Posterizing");
        let mut posterized = kmeans::posterize(&rgb, self.config.clusters as usize, self.config.seed);

        tracing::debug!(low = self.config.edge_low, high = self.config.edge_high, "Detecting edges");
        let edges = self.edge_mask(&posterized);
        for (pixel, &edge) in posterized.pixels_mut().zip(&edges) {
            if edge {
                *pixel = Rgb([0, 0, 0]);
            }
        }
        Ok(posterized)
    }

    fn edge_mask(&self, posterized: &RgbImage) -> Vec<bool> {
        let luma = Plane::luma_from_rgb(posterized);
        let smoothed = filters::gaussian_blur(&luma, EDGE_SMOOTHING_SIGMA);
        let gradients = filters::sobel(&smoothed);
        let magnitude = gradients.magnitude();
        let thinned = non_max_suppression(&gradients, &magnitude);
        hysteresis(&thinned, self.config.edge_low, self.config.edge_high)
    }

    fn sharpen(&self, image: &RgbImage) -> RgbImage {
        let amount = self.config.sharpen_amount / 100.0;
        let threshold = self.config.sharpen_threshold as f32;
        let channels = Plane::channels_from_rgb(image).map(|channel| {
            let blurred = filters::gaussian_blur(&channel, self.config.sharpen_radius);
            let mut out = channel.clone();
            for (v, b) in out.data.iter_mut().zip(&blurred.data) {
                let diff = *v - b;
                if diff.abs() > threshold {
                    *v += diff * amount;
                }
            }
            out
        });
        filters::rgb_from_channels(&channels)
    }
}

/// Keep only pixels that are a local maximum across the gradient direction.
fn non_max_suppression(gradients: &Gradients, magnitude: &Plane) -> Plane {
    let (w, h) = (magnitude.width as i64, magnitude.height as i64);
    let at = |x: i64, y: i64| {
        if x < 0 || y < 0 || x >= w || y >= h {
            0.0
        } else {
            magnitude.data[(y * w + x) as usize]
        }
    };

    let mut out = Plane::new(magnitude.width, magnitude.height);
    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            let m = magnitude.data[i];
            if m == 0.0 {
                continue;
            }
            let degrees = gradients.direction_at(i).to_degrees().rem_euclid(180.0);
            let (dx, dy) = if !(22.5..157.5).contains(&degrees) {
                (1, 0)
            } else if degrees < 67.5 {
                (1, 1)
            } else if degrees < 112.5 {
                (0, 1)
            } else {
                (-1, 1)
            };
            if m > at(x + dx, y + dy) && m >= at(x - dx, y - dy) {
                out.data[i] = m;
            }
        }
    }
    out
}

/// Dual threshold: strong pixels seed the mask, weak pixels join only when
/// 8-connected to it.
fn hysteresis(magnitude: &Plane, low: f32, high: f32) -> Vec<bool> {
    let (w, h) = (magnitude.width as i64, magnitude.height as i64);
    let mut mask = vec![false; magnitude.data.len()];
    let mut stack: Vec<usize> = Vec::new();

    for (i, &m) in magnitude.data.iter().enumerate() {
        if m > high {
            mask[i] = true;
            stack.push(i);
        }
    }

    while let Some(i) = stack.pop() {
        let (x, y) = ((i as i64) % w, (i as i64) / w);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if (dx == 0 && dy == 0) || nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                let j = (ny * w + nx) as usize;
                if !mask[j] && magnitude.data[j] > low {
                    mask[j] = true;
                    stack.push(j);
                }
            }
        }
    }
    mask
}
