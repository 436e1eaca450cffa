//! Decode, render, resize and encode. Everything here is synchronous and
//! CPU-bound; callers run it off the async runtime.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageFormat, RgbImage};
use uuid::Uuid;

use crate::pipelines::{PipelineError, PipelineInstance};

/// Longest side of the preview image.
pub const PREVIEW_MAX_SIDE: u32 = 1600;
pub const PREVIEW_JPEG_QUALITY: u8 = 85;

pub const PRINT_CONTENT_TYPE: &str = "image/tiff";
pub const PREVIEW_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to decode source image: {0}")]
    Decode(String),

    #[error("Failed to encode output image: {0}")]
    Encode(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Encoded print raster and preview for one render.
#[derive(Debug, Clone)]
pub struct RenderedOutputs {
    pub print: Vec<u8>,
    pub preview: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn print_key(job_id: Uuid) -> String {
    format!("renders/{}/output.tiff", job_id)
}

pub fn preview_key(job_id: Uuid) -> String {
    format!("renders/{}/preview.jpg", job_id)
}

/// Render `source` with `instance` at the `target` pixel size.
pub fn render_outputs(
    instance: &PipelineInstance,
    source: &[u8],
    target: (u32, u32),
) -> Result<RenderedOutputs, OutputError> {
    let decoded = image::load_from_memory(source).map_err(|e| OutputError::Decode(e.to_string()))?;
    tracing::debug!(
        width = decoded.width(),
        height = decoded.height(),
        "Decoded source image"
    );

    let rendered = instance.render(&decoded)?;
    let print = resize_to(rendered.to_rgb8(), target);

    let preview = encode_preview(&print)?;
    let (width, height) = print.dimensions();
    let print = encode_print(print)?;

    Ok(RenderedOutputs {
        print,
        preview,
        width,
        height,
    })
}

fn resize_to(image: RgbImage, (width, height): (u32, u32)) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width, height, FilterType::Lanczos3)
}

/// Print raster as uncompressed RGB8 TIFF.
pub fn encode_print(image: RgbImage) -> Result<Vec<u8>, OutputError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Tiff)
        .map_err(|e| OutputError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

/// JPEG preview, downscaled so the longest side fits [`PREVIEW_MAX_SIDE`].
pub fn encode_preview(image: &RgbImage) -> Result<Vec<u8>, OutputError> {
    let (width, height) = preview_dimensions(image.width(), image.height());
    let scaled;
    let preview = if (width, height) == image.dimensions() {
        image
    } else {
        scaled = imageops::resize(image, width, height, FilterType::Lanczos3);
        &scaled
    };

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, PREVIEW_JPEG_QUALITY)
        .encode(
            preview.as_raw(),
            preview.width(),
            preview.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| OutputError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Aspect-preserving size whose longest side is at most [`PREVIEW_MAX_SIDE`].
pub fn preview_dimensions(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= PREVIEW_MAX_SIDE {
        return (width, height);
    }
    let scale = PREVIEW_MAX_SIDE as f64 / longest as f64;
    let fit = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, PREVIEW_MAX_SIDE);
    (fit(width), fit(height))
}
