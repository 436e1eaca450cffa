//! Pencil Sketch: invert, blur, color-dodge, then a linear contrast stretch.

use garde::Validate;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::config::positive;
use super::filters::{self, Plane};
use super::{flatten_to_rgb, PipelineError, RenderAlgorithm, MAX_CHANNEL};

/// Pivot of the contrast adjustment.
const MID_CHANNEL: f32 = 128.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputMode {
    Grayscale,
    Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PencilSketchConfig {
    #[garde(custom(positive))]
    pub blur_sigma: f32,

    #[garde(custom(positive))]
    pub contrast_factor: f32,

    #[garde(skip)]
    pub output_mode: OutputMode,
}

impl Default for PencilSketchConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 21.0,
            contrast_factor: 1.3,
            output_mode: OutputMode::Grayscale,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PencilSketch {
    config: PencilSketchConfig,
}

impl RenderAlgorithm for PencilSketch {
    type Config = PencilSketchConfig;

    fn from_config(config: PencilSketchConfig) -> Result<Self, PipelineError> {
        Ok(Self { config })
    }

    fn config(&self) -> &PencilSketchConfig {
        &self.config
    }

    fn render(&self, image: &DynamicImage) -> Result<DynamicImage, PipelineError> {
        let rgb = flatten_to_rgb(image);
        tracing::debug!(
            sigma = self.config.blur_sigma,
            mode = %self.config.output_mode,
            "Sketching"
        );
        let out = match self.config.output_mode {
            OutputMode::Grayscale => {
                let intensity = Plane::luma_from_rgb(&rgb).map(f32::round);
                DynamicImage::ImageLuma8(self.sketch(&intensity).to_gray_image())
            }
            OutputMode::Color => {
                let channels = Plane::channels_from_rgb(&rgb).map(|c| self.sketch(&c));
                DynamicImage::ImageRgb8(filters::rgb_from_channels(&channels))
            }
        };
        Ok(out)
    }
}

impl PencilSketch {
    fn sketch(&self, intensity: &Plane) -> Plane {
        let inverted = intensity.map(|v| MAX_CHANNEL - v);
        let blurred = filters::gaussian_blur(&inverted, self.config.blur_sigma)
            .map(|v| v.round().clamp(0.0, MAX_CHANNEL));

        let factor = self.config.contrast_factor;
        let mut out = intensity.clone();
        for (v, &b) in out.data.iter_mut().zip(&blurred.data) {
            *v = contrast(dodge(*v, b), factor);
        }
        out
    }
}

/// Color dodge of `base` by `blend`; a zero denominator counts as one.
pub fn dodge(base: f32, blend: f32) -> f32 {
    let mut denom = MAX_CHANNEL - blend;
    if denom <= 0.0 {
        denom = 1.0;
    }
    (base / denom * MAX_CHANNEL).clamp(0.0, MAX_CHANNEL)
}

/// Linear stretch around the channel midpoint.
pub fn contrast(value: f32, factor: f32) -> f32 {
    ((value - MID_CHANNEL) * factor + MID_CHANNEL).clamp(0.0, MAX_CHANNEL)
}
