//! Between The Lines: directional hatching along contours, then posterized
//! into a few gray bands.
//!
//! The stroke direction is perpendicular to the local gradient. Directions
//! are binned into [`DIRECTION_BINS`] line kernels over the half circle,
//! since a line kernel is unchanged by a 180° turn. Only pixels whose
//! gradient magnitude exceeds `edge_threshold` are blurred; the rest keep
//! their grayscale value and go straight to posterization.

use std::f32::consts::{FRAC_PI_2, PI};

use garde::Validate;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use super::filters::{self, Plane};
use super::{flatten_to_rgb, PipelineError, RenderAlgorithm};

pub const DIRECTION_BINS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BetweenTheLinesConfig {
    #[garde(range(min = 1, max = 255))]
    pub stroke_length: u32,

    #[garde(range(min = 1, max = 256))]
    pub gray_levels: u32,

    #[garde(range(min = 0.0))]
    pub edge_threshold: f32,
}

impl Default for BetweenTheLinesConfig {
    fn default() -> Self {
        Self {
            stroke_length: 15,
            gray_levels: 4,
            edge_threshold: 30.0,
        }
    }
}

/// Pixel offsets of a straight stroke through the origin, uniformly weighted.
#[derive(Debug, Clone, PartialEq)]
struct LineKernel {
    offsets: Vec<(i64, i64)>,
    weight: f32,
}

impl LineKernel {
    fn new(length: u32, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        let center = (length as f32 - 1.0) / 2.0;
        let offsets = (0..length)
            .map(|k| {
                let t = k as f32 - center;
                ((t * cos).round() as i64, (t * sin).round() as i64)
            })
            .collect();
        Self {
            offsets,
            weight: 1.0 / length as f32,
        }
    }

    fn apply(&self, plane: &Plane, x: u32, y: u32) -> f32 {
        self.offsets
            .iter()
            .map(|&(dx, dy)| plane.get_reflected(x as i64 + dx, y as i64 + dy))
            .sum::<f32>()
            * self.weight
    }
}

/// Nearest kernel bin for a stroke angle in radians.
fn angle_bin(angle: f32) -> usize {
    let step = PI / DIRECTION_BINS as f32;
    let folded = angle.rem_euclid(PI);
    (folded / step).round() as usize % DIRECTION_BINS
}

#[derive(Debug, Clone)]
pub struct BetweenTheLines {
    config: BetweenTheLinesConfig,
    kernels: Vec<LineKernel>,
}

impl RenderAlgorithm for BetweenTheLines {
    type Config = BetweenTheLinesConfig;

    fn from_config(config: BetweenTheLinesConfig) -> Result<Self, PipelineError> {
        let step = PI / DIRECTION_BINS as f32;
        let kernels = (0..DIRECTION_BINS)
            .map(|bin| LineKernel::new(config.stroke_length, bin as f32 * step))
            .collect();
        Ok(Self { config, kernels })
    }

    fn config(&self) -> &BetweenTheLinesConfig {
        &self.config
    }

    fn render(&self, image: &DynamicImage) -> Result<DynamicImage, PipelineError> {
        let gray = Plane::luma_from_rgb(&flatten_to_rgb(image)).map(f32::round);

        tracing::debug!(threshold = self.config.edge_threshold, "Computing gradients");
        let gradients = filters::sobel(&gray);
        let magnitude = gradients.magnitude();

        tracing::debug!(stroke_length = self.config.stroke_length, "Hatching");
        let mut hatched = gray.clone();
        let mut stroked = 0usize;
        for y in 0..gray.height {
            for x in 0..gray.width {
                let i = y as usize * gray.width as usize + x as usize;
                if magnitude.data[i] <= self.config.edge_threshold {
                    continue;
                }
                let stroke_angle = gradients.direction_at(i) + FRAC_PI_2;
                hatched.data[i] = self.kernels[angle_bin(stroke_angle)].apply(&gray, x, y);
                stroked += 1;
            }
        }

        tracing::debug!(stroked, levels = self.config.gray_levels, "Posterizing");
        Ok(DynamicImage::ImageLuma8(posterize(&hatched, self.config.gray_levels)))
    }
}

/// Quantize into `levels` equal bands of the 256 channel values.
fn posterize(plane: &Plane, levels: u32) -> GrayImage {
    let mut out = plane.to_gray_image();
    for px in out.pixels_mut() {
        px[0] = band(px[0], levels);
    }
    out
}

#[inline]
fn band(value: u8, levels: u32) -> u8 {
    let index = (value as u32 * levels / 256).min(levels - 1);
    (index * 256 / levels) as u8
}
