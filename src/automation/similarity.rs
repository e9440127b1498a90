//! Structural similarity between captured frames.
//!
//! Used to decide whether a scroll actually moved the content. Frames are
//! grayscaled and downsampled before comparison; the score is the mean of
//! the SSIM map computed with a 7x7 Gaussian window.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};

use crate::ocr::preprocess::{downsample, to_grayscale};

/// Longest side used for comparisons. Similarity drives a threshold
/// decision, so full resolution buys nothing.
const SIMILARITY_MAX_SIDE: u32 = 400;

const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Similarity of two frames in 0.0-1.0, where 1.0 is pixel-identical
/// structure. Differing dimensions are reconciled by resizing the second
/// frame to the first.
pub fn frame_similarity(a: &RgbaImage, b: &RgbaImage) -> f64 {
    let gray_a = downsample(&to_grayscale(a), SIMILARITY_MAX_SIDE);
    let mut gray_b = downsample(&to_grayscale(b), SIMILARITY_MAX_SIDE);
    if gray_a.dimensions() != gray_b.dimensions() {
        gray_b = imageops::resize(
            &gray_b,
            gray_a.width(),
            gray_a.height(),
            FilterType::Triangle,
        );
    }
    ssim(&gray_a, &gray_b)
}

struct Plane {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Plane {
    fn from_image(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.pixels().map(|p| p[0] as f64).collect(),
        }
    }

    fn multiply(&self, other: &Plane) -> Plane {
        Plane {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(x, y)| x * y)
                .collect(),
        }
    }
}

/// 7-tap Gaussian, sigma 1.5, normalized.
fn gaussian_kernel() -> [f64; 7] {
    let sigma = 1.5f64;
    let mut kernel = [0.0; 7];
    let mut sum = 0.0;
    for (i, k) in kernel.iter_mut().enumerate() {
        let d = i as f64 - 3.0;
        *k = (-d * d / (2.0 * sigma * sigma)).exp();
        sum += *k;
    }
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable blur with clamped edges.
fn blur(plane: &Plane, kernel: &[f64; 7]) -> Plane {
    let (w, h) = (plane.width, plane.height);
    let mut rows = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, k) in kernel.iter().enumerate() {
                let sx = (x as isize + i as isize - 3).clamp(0, w as isize - 1) as usize;
                acc += plane.data[y * w + sx] * k;
            }
            rows[y * w + x] = acc;
        }
    }
    let mut out = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, k) in kernel.iter().enumerate() {
                let sy = (y as isize + i as isize - 3).clamp(0, h as isize - 1) as usize;
                acc += rows[sy * w + x] * k;
            }
            out[y * w + x] = acc;
        }
    }
    Plane {
        width: w,
        height: h,
        data: out,
    }
}

/// Mean SSIM over Gaussian-windowed local statistics.
pub fn ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 0.0;
    }
    if a.width() == 0 || a.height() == 0 {
        return 0.0;
    }

    let x = Plane::from_image(a);
    let y = Plane::from_image(b);
    let kernel = gaussian_kernel();

    let mu_x = blur(&x, &kernel);
    let mu_y = blur(&y, &kernel);
    let xx = blur(&x.multiply(&x), &kernel);
    let yy = blur(&y.multiply(&y), &kernel);
    let xy = blur(&x.multiply(&y), &kernel);

    let mut total = 0.0;
    for i in 0..x.data.len() {
        let mx = mu_x.data[i];
        let my = mu_y.data[i];
        let sigma_x = xx.data[i] - mx * mx;
        let sigma_y = yy.data[i] - my * my;
        let sigma_xy = xy.data[i] - mx * my;
        let numerator = (2.0 * mx * my + C1) * (2.0 * sigma_xy + C2);
        let denominator = (mx * mx + my * my + C1) * (sigma_x + sigma_y + C2);
        total += numerator / denominator;
    }
    (total / x.data.len() as f64).clamp(0.0, 1.0)
}
