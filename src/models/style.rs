use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipelines::PipelineError;

/// A published rendering style: pipeline slug, pinned algorithm version and
/// a partial parameter override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Style {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub algorithm_config: serde_json::Value,
    pub algorithm_version: String,
}

/// Physical print size. `resolution` is dots per unit of `width`/`height`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct SizePreset {
    pub id: Uuid,
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub resolution: i32,
}

impl SizePreset {
    /// Target raster size: `round(width × resolution)` by `round(height × resolution)`.
    pub fn pixel_dimensions(&self) -> Result<(u32, u32), PipelineError> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "size preset {} has invalid dimensions {}x{}",
                self.name, self.width, self.height
            )));
        }
        if self.resolution <= 0 {
            return Err(PipelineError::InvalidConfiguration(format!(
                "size preset {} has invalid resolution {}",
                self.name, self.resolution
            )));
        }

        let scale = |length: f64| (length * self.resolution as f64).round();
        let (width, height) = (scale(self.width), scale(self.height));
        if width < 1.0 || height < 1.0 || width > u32::MAX as f64 || height > u32::MAX as f64 {
            return Err(PipelineError::InvalidConfiguration(format!(
                "size preset {} resolves to unusable raster {}x{}",
                self.name, width, height
            )));
        }
        Ok((width as u32, height as u32))
    }
}
