//! Seeded k-means color quantization.
//!
//! Clustering runs over the distinct colors of the image weighted by how
//! often each occurs, which is equivalent to clustering every pixel but
//! bounded by the palette size instead of the pixel count. Distinct colors
//! are kept in ascending packed order so iteration never depends on hash
//! ordering.

use image::{Rgb, RgbImage};

use super::filters::to_channel;

pub const MAX_ITERATIONS: usize = 300;

/// Stop once no centroid moves further than this (in channel units).
pub const CONVERGENCE_TOLERANCE: f64 = 1e-3;

/// SplitMix64: a tiny generator whose sequence is fixed by its seed alone.
///
/// One instance is created per clustering run, so concurrent renders never
/// share generator state.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)` with 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

type Point = [f64; 3];

/// Distinct colors of an image with their occurrence counts.
struct ColorHistogram {
    packed: Vec<u32>,
    points: Vec<Point>,
    weights: Vec<f64>,
}

impl ColorHistogram {
    fn from_image(image: &RgbImage) -> Self {
        let mut all: Vec<u32> = image.pixels().map(pack).collect();
        all.sort_unstable();

        let mut packed = Vec::new();
        let mut weights = Vec::new();
        for color in all {
            match packed.last() {
                Some(&last) if last == color => {
                    if let Some(w) = weights.last_mut() {
                        *w += 1.0;
                    }
                }
                _ => {
                    packed.push(color);
                    weights.push(1.0);
                }
            }
        }
        let points = packed.iter().map(|&c| unpack(c)).collect();
        Self { packed, points, weights }
    }

    fn index_of(&self, pixel: &Rgb<u8>) -> Option<usize> {
        self.packed.binary_search(&pack(pixel)).ok()
    }
}

#[inline]
fn pack(p: &Rgb<u8>) -> u32 {
    (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32
}

#[inline]
fn unpack(c: u32) -> Point {
    [((c >> 16) & 0xFF) as f64, ((c >> 8) & 0xFF) as f64, (c & 0xFF) as f64]
}

#[inline]
fn distance_sq(a: &Point, b: &Point) -> f64 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    let d2 = a[2] - b[2];
    d0 * d0 + d1 * d1 + d2 * d2
}

/// Index of the closest centroid; ties resolve to the lowest index.
fn nearest(point: &Point, centroids: &[Point]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = distance_sq(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Pick an index with probability proportional to `weights`.
fn weighted_pick(weights: &[f64], rng: &mut SplitMix64) -> usize {
    let total: f64 = weights.iter().sum();
    let target = rng.next_f64() * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if cumulative > target && *w > 0.0 {
            return i;
        }
    }
    weights.iter().rposition(|&w| w > 0.0).unwrap_or(0)
}

/// k-means++ seeding with occurrence-weighted probabilities.
fn seed_centroids(points: &[Point], weights: &[f64], k: usize, rng: &mut SplitMix64) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[weighted_pick(weights, rng)]);

    let mut closest: Vec<f64> = points.iter().map(|p| distance_sq(p, &centroids[0])).collect();
    while centroids.len() < k {
        let scores: Vec<f64> = closest.iter().zip(weights).map(|(d, w)| d * w).collect();
        let next = points[weighted_pick(&scores, rng)];
        for (d, p) in closest.iter_mut().zip(points) {
            *d = d.min(distance_sq(p, &next));
        }
        centroids.push(next);
    }
    centroids
}

/// Fit `k` centroids and return them with the label of every point.
fn fit(points: &[Point], weights: &[f64], k: usize, seed: u64) -> (Vec<Point>, Vec<usize>) {
    let mut rng = SplitMix64::new(seed);
    let mut centroids = seed_centroids(points, weights, k, &mut rng);
    let mut labels = vec![0usize; points.len()];

    for iteration in 0..MAX_ITERATIONS {
        let mut distances = vec![0.0f64; points.len()];
        for (i, p) in points.iter().enumerate() {
            let (label, d) = nearest(p, &centroids);
            labels[i] = label;
            distances[i] = d;
        }

        let mut sums = vec![[0.0f64; 3]; k];
        let mut totals = vec![0.0f64; k];
        for ((p, &label), &w) in points.iter().zip(&labels).zip(weights) {
            for c in 0..3 {
                sums[label][c] += p[c] * w;
            }
            totals[label] += w;
        }

        let mut shift = 0.0f64;
        for j in 0..k {
            let updated = if totals[j] > 0.0 {
                [sums[j][0] / totals[j], sums[j][1] / totals[j], sums[j][2] / totals[j]]
            } else {
                // Re-seed an empty cluster at the worst-fitting point.
                let far = distances
                    .iter()
                    .enumerate()
                    .fold(0, |best, (i, &d)| if d > distances[best] { i } else { best });
                distances[far] = 0.0;
                points[far]
            };
            shift = shift.max(distance_sq(&updated, &centroids[j]));
            centroids[j] = updated;
        }

        if shift <= CONVERGENCE_TOLERANCE * CONVERGENCE_TOLERANCE {
            tracing::trace!(iteration, "k-means converged");
            break;
        }
    }

    for (i, p) in points.iter().enumerate() {
        labels[i] = nearest(p, &centroids).0;
    }
    (centroids, labels)
}

/// Replace every pixel with the rounded centroid of its color cluster.
pub fn posterize(image: &RgbImage, clusters: usize, seed: u64) -> RgbImage {
    let histogram = ColorHistogram::from_image(image);
    if histogram.points.is_empty() {
        return image.clone();
    }

    // Fewer distinct colors than clusters: each color is its own cluster.
    if histogram.points.len() <= clusters {
        return image.clone();
    }

    let (centroids, labels) = fit(&histogram.points, &histogram.weights, clusters.max(1), seed);
    let palette: Vec<Rgb<u8>> = centroids
        .iter()
        .map(|c| Rgb([to_channel(c[0] as f32), to_channel(c[1] as f32), to_channel(c[2] as f32)]))
        .collect();

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        if let Some(i) = histogram.index_of(pixel) {
            *pixel = palette[labels[i]];
        }
    }
    out
}
