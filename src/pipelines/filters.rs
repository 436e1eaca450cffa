//! Float raster primitives shared by the render pipelines.
//!
//! Every operation here is a plain deterministic loop over row-major
//! `f32` planes. Out-of-bounds reads use half-sample symmetric reflection
//! (`d c b a | a b c d`), which keeps gradients of a flat image at exactly
//! zero along the borders.

use image::{GrayImage, RgbImage};

/// ITU-R BT.601 luma weights.
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Single-channel float raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0.0)
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Read with symmetric reflection for coordinates outside the plane.
    #[inline]
    pub fn get_reflected(&self, x: i64, y: i64) -> f32 {
        let rx = reflect(x, self.width);
        let ry = reflect(y, self.height);
        self.data[ry * self.width as usize + rx]
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Plane {
        Plane {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Luminance plane of an RGB image.
    pub fn luma_from_rgb(image: &RgbImage) -> Plane {
        let (width, height) = image.dimensions();
        let data = image
            .pixels()
            .map(|p| {
                LUMA_WEIGHTS[0] * p[0] as f32
                    + LUMA_WEIGHTS[1] * p[1] as f32
                    + LUMA_WEIGHTS[2] * p[2] as f32
            })
            .collect();
        Plane { width, height, data }
    }

    /// One plane per RGB channel.
    pub fn channels_from_rgb(image: &RgbImage) -> [Plane; 3] {
        let (width, height) = image.dimensions();
        let mut planes = [
            Plane::new(width, height),
            Plane::new(width, height),
            Plane::new(width, height),
        ];
        for (i, p) in image.pixels().enumerate() {
            for (c, plane) in planes.iter_mut().enumerate() {
                plane.data[i] = p[c] as f32;
            }
        }
        planes
    }

    /// Round to the nearest integer and clamp into `0..=255`.
    pub fn to_gray_image(&self) -> GrayImage {
        let raw = self.data.iter().map(|&v| to_channel(v)).collect();
        GrayImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Interleave three planes of identical size into an RGB image.
pub fn rgb_from_channels(planes: &[Plane; 3]) -> RgbImage {
    let (width, height) = (planes[0].width, planes[0].height);
    let mut raw = Vec::with_capacity(planes[0].data.len() * 3);
    for i in 0..planes[0].data.len() {
        for plane in planes {
            raw.push(to_channel(plane.data[i]));
        }
    }
    RgbImage::from_raw(width, height, raw).unwrap_or_else(|| RgbImage::new(width, height))
}

/// Round half away from zero, clamp into the 8-bit channel range.
#[inline]
pub fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Map an arbitrary coordinate into `0..len` by half-sample reflection.
#[inline]
pub fn reflect(i: i64, len: u32) -> usize {
    let n = len as i64;
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    let mut m = i.rem_euclid(period);
    if m >= n {
        m = period - 1 - m;
    }
    m as usize
}

/// Normalized 1-D Gaussian kernel with radius `ceil(3σ)`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = ((3.0 * sigma).ceil() as i64).max(1);
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-((x * x) as f32) / two_sigma_sq).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Separable Gaussian blur: horizontal pass, then vertical pass.
pub fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    let kernel = gaussian_kernel(sigma);
    let horizontal = convolve_axis(plane, &kernel, Axis::Horizontal);
    convolve_axis(&horizontal, &kernel, Axis::Vertical)
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

fn convolve_axis(plane: &Plane, kernel: &[f32], axis: Axis) -> Plane {
    let radius = (kernel.len() / 2) as i64;
    let mut out = Plane::new(plane.width, plane.height);
    let w = plane.width as usize;
    for y in 0..plane.height {
        for x in 0..plane.width {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let offset = k as i64 - radius;
                let sample = match axis {
                    Axis::Horizontal => plane.get_reflected(x as i64 + offset, y as i64),
                    Axis::Vertical => plane.get_reflected(x as i64, y as i64 + offset),
                };
                acc += weight * sample;
            }
            out.data[y as usize * w + x as usize] = acc;
        }
    }
    out
}

/// Horizontal and vertical Sobel responses.
pub struct Gradients {
    pub gx: Plane,
    pub gy: Plane,
}

impl Gradients {
    pub fn magnitude(&self) -> Plane {
        Plane {
            width: self.gx.width,
            height: self.gx.height,
            data: self
                .gx
                .data
                .iter()
                .zip(&self.gy.data)
                .map(|(&gx, &gy)| (gx * gx + gy * gy).sqrt())
                .collect(),
        }
    }

    /// Gradient direction `atan2(gy, gx)` at one pixel, in radians.
    #[inline]
    pub fn direction_at(&self, index: usize) -> f32 {
        self.gy.data[index].atan2(self.gx.data[index])
    }
}

/// 3x3 Sobel operator (unnormalized, reflect boundary).
pub fn sobel(plane: &Plane) -> Gradients {
    let mut gx = Plane::new(plane.width, plane.height);
    let mut gy = Plane::new(plane.width, plane.height);
    let w = plane.width as usize;
    for y in 0..plane.height as i64 {
        for x in 0..plane.width as i64 {
            let p = |dx: i64, dy: i64| plane.get_reflected(x + dx, y + dy);
            let h = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let v = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let i = y as usize * w + x as usize;
            gx.data[i] = h;
            gy.data[i] = v;
        }
    }
    Gradients { gx, gy }
}
