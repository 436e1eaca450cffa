//! Rendering pipelines.
//!
//! Each algorithm is a pure function of `(image, resolved configuration)`.
//! Construction merges a partial JSON override onto the algorithm's
//! compiled-in defaults and validates the result, so a bad parameter is
//! rejected before any pixel is touched. The set of algorithms is closed:
//! [`Pipeline`] is a tagged enum and [`registry::PipelineRegistry`] is a
//! static table from `(slug, version)` to a constructor.

pub mod between_lines;
pub mod config;
pub mod filters;
pub mod kmeans;
pub mod pencil_sketch;
pub mod pop_poster;
pub mod registry;

use std::fmt;

use garde::Validate;
use image::{DynamicImage, RgbImage};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use between_lines::{BetweenTheLines, BetweenTheLinesConfig};
pub use pencil_sketch::{OutputMode, PencilSketch, PencilSketchConfig};
pub use pop_poster::{PopPoster, PopPosterConfig};
pub use registry::PipelineRegistry;

/// Upper bound of an 8-bit channel.
pub const MAX_CHANNEL: f32 = 255.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown style: {0}")]
    UnknownStyle(String),

    #[error("Style {slug} has no algorithm registered at version {version}")]
    UnknownVersion { slug: String, version: String },

    #[error("Processing failed: {0}")]
    Processing(String),
}

impl PipelineError {
    /// Failure label recorded on jobs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfiguration(_) => "invalid_configuration",
            PipelineError::UnknownStyle(_) => "unknown_style",
            PipelineError::UnknownVersion { .. } => "unknown_version",
            PipelineError::Processing(_) => "processing_error",
        }
    }
}

/// Fixed name and version of a registered algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmIdentity {
    pub slug: &'static str,
    pub name: &'static str,
    pub version: &'static str,
}

impl fmt::Display for AlgorithmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slug, self.version)
    }
}

/// Contract shared by every rendering algorithm.
pub trait RenderAlgorithm: Sized {
    type Config: Default
        + Clone
        + fmt::Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Validate<Context = ()>;

    /// Build from a fully merged configuration, checking any rule that spans
    /// several fields.
    fn from_config(config: Self::Config) -> Result<Self, PipelineError>;

    fn config(&self) -> &Self::Config;

    fn render(&self, image: &DynamicImage) -> Result<DynamicImage, PipelineError>;

    /// Merge `overrides` onto the defaults, validate, then construct.
    fn with_overrides(overrides: &serde_json::Value) -> Result<Self, PipelineError> {
        let merged: Self::Config = config::merge_config(overrides)?;
        merged
            .validate()
            .map_err(|report| PipelineError::InvalidConfiguration(report.to_string()))?;
        Self::from_config(merged)
    }
}

/// One of the closed set of algorithms.
#[derive(Debug, Clone)]
pub enum Pipeline {
    PopPoster(PopPoster),
    PencilSketch(PencilSketch),
    BetweenTheLines(BetweenTheLines),
}

impl Pipeline {
    pub fn render(&self, image: &DynamicImage) -> Result<DynamicImage, PipelineError> {
        match self {
            Pipeline::PopPoster(p) => p.render(image),
            Pipeline::PencilSketch(p) => p.render(image),
            Pipeline::BetweenTheLines(p) => p.render(image),
        }
    }

    /// The resolved configuration as JSON.
    pub fn resolved_config(&self) -> Result<serde_json::Value, PipelineError> {
        match self {
            Pipeline::PopPoster(p) => snapshot_config(p.config()),
            Pipeline::PencilSketch(p) => snapshot_config(p.config()),
            Pipeline::BetweenTheLines(p) => snapshot_config(p.config()),
        }
    }
}

fn snapshot_config<C: Serialize>(config: &C) -> Result<serde_json::Value, PipelineError> {
    serde_json::to_value(config)
        .map_err(|e| PipelineError::Processing(format!("cannot snapshot configuration: {}", e)))
}

/// A constructed pipeline bound to the identity it was resolved under.
#[derive(Debug, Clone)]
pub struct PipelineInstance {
    identity: AlgorithmIdentity,
    pipeline: Pipeline,
}

impl PipelineInstance {
    pub fn new(identity: AlgorithmIdentity, pipeline: Pipeline) -> Self {
        Self { identity, pipeline }
    }

    pub fn identity(&self) -> AlgorithmIdentity {
        self.identity
    }

    pub fn resolved_config(&self) -> Result<serde_json::Value, PipelineError> {
        self.pipeline.resolved_config()
    }

    pub fn render(&self, image: &DynamicImage) -> Result<DynamicImage, PipelineError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(PipelineError::Processing(format!(
                "cannot render an empty {}x{} image",
                width, height
            )));
        }
        tracing::debug!(algorithm = %self.identity, width, height, "Rendering image");
        self.pipeline.render(image)
    }
}

/// Drop any alpha channel by compositing over white.
pub fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = p[3] as f32 / MAX_CHANNEL;
        let blend = |c: u8| filters::to_channel(c as f32 * alpha + MAX_CHANNEL * (1.0 - alpha));
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}
