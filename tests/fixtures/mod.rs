//! Synthetic source images.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Eight well-separated colors, laid out by [`palette_blocks`].
pub const PALETTE: [[u8; 3]; 8] = [
    [230, 40, 40],
    [40, 200, 60],
    [40, 60, 220],
    [240, 220, 50],
    [240, 130, 200],
    [60, 210, 220],
    [250, 250, 250],
    [120, 70, 30],
];

/// A 4x2 grid of flat blocks, one per [`PALETTE`] color.
pub fn palette_blocks(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let col = (x * 4 / width).min(3);
        let row = (y * 2 / height).min(1);
        Rgb(PALETTE[(row * 4 + col) as usize])
    })
}

pub fn uniform(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}

/// Smooth gradients with a diagonal stripe and a disc, so every pipeline
/// has both flat areas and edges to work with.
pub fn photo_like(width: u32, height: u32) -> RgbImage {
    let (cx, cy) = (width as f32 * 0.6, height as f32 * 0.4);
    let radius = width.min(height) as f32 * 0.25;
    RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        if ((fx - cx).powi(2) + (fy - cy).powi(2)).sqrt() < radius {
            return Rgb([210, 60, 40]);
        }
        if (x + y) % 16 < 3 {
            return Rgb([20, 20, 30]);
        }
        let r = (fx / width as f32 * 200.0) as u8 + 30;
        let g = (fy / height as f32 * 180.0) as u8 + 40;
        let b = ((x * 3 + y * 5) % 97) as u8 + 100;
        Rgb([r, g, b])
    })
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut buf, ImageFormat::Png)
        .expect("PNG encoding of a fixture cannot fail");
    buf.into_inner()
}
