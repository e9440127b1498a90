//! Frame preparation and text region detection.
//!
//! Frames are grayscaled and downsampled before detection, binarized with a
//! locally adaptive threshold, and segmented into candidate text regions by
//! ink projection profiles. Binary images use the convention ink = 255,
//! background = 0.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};

use crate::models::Rectangle;

/// Side length of the square neighbourhood used for the local mean.
const THRESHOLD_BLOCK: u32 = 15;
/// Margin a pixel must clear against its local mean to count as ink.
const THRESHOLD_OFFSET: i32 = 10;
/// Minimum ink pixels for a row/column to register in a projection profile.
const MIN_PROFILE_INK: u32 = 2;

pub fn to_grayscale(img: &RgbaImage) -> GrayImage {
    imageops::grayscale(img)
}

/// Shrinks the image so its longest side is at most `max_side`, preserving
/// aspect ratio. Images already within the limit are returned unchanged.
pub fn downsample(img: &GrayImage, max_side: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return img.clone();
    }
    let scale = max_side as f32 / longest as f32;
    let new_w = ((width as f32 * scale).round() as u32).max(1);
    let new_h = ((height as f32 * scale).round() as u32).max(1);
    imageops::resize(img, new_w, new_h, FilterType::Triangle)
}

/// Crops an absolute rectangle, clamped to the image bounds.
pub fn crop(img: &GrayImage, region: &Rectangle) -> GrayImage {
    let (w, h) = img.dimensions();
    let x0 = region.x.max(0) as u32;
    let y0 = region.y.max(0) as u32;
    let x0 = x0.min(w);
    let y0 = y0.min(h);
    let rw = region.width.min(w - x0);
    let rh = region.height.min(h - y0);
    imageops::crop_imm(img, x0, y0, rw, rh).to_image()
}

/// Blind image quality estimate in 0.0–1.0, blending sharpness (Laplacian
/// variance), contrast (pixel standard deviation) and brightness balance.
pub fn quality_score(img: &GrayImage) -> f32 {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let n = (width as f64) * (height as f64);
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    for p in img.pixels() {
        let v = p[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    let contrast = (variance.sqrt() / 128.0).min(1.0);
    let brightness = 1.0 - (mean - 128.0).abs() / 128.0;

    let mut lap_sum = 0f64;
    let mut lap_sq = 0f64;
    let mut count = 0f64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let c = img.get_pixel(x, y)[0] as f64;
            let lap = 4.0 * c
                - img.get_pixel(x, y - 1)[0] as f64
                - img.get_pixel(x, y + 1)[0] as f64
                - img.get_pixel(x - 1, y)[0] as f64
                - img.get_pixel(x + 1, y)[0] as f64;
            lap_sum += lap;
            lap_sq += lap * lap;
            count += 1.0;
        }
    }
    let lap_var = (lap_sq / count - (lap_sum / count).powi(2)).max(0.0);
    let sharpness = (lap_var / 1000.0).min(1.0);

    (0.4 * sharpness + 0.3 * contrast + 0.3 * brightness) as f32
}

/// Binarizes against a local mean, trying both polarities and keeping the
/// one with the lower ink ratio. Chat text is sparse against its background,
/// so the sparser polarity is the one with text as ink regardless of theme.
pub fn adaptive_threshold(img: &GrayImage) -> GrayImage {
    let integral = integral_image(img);
    let dark_ink = threshold_polarity(img, &integral, true);
    let light_ink = threshold_polarity(img, &integral, false);
    if ink_ratio(&dark_ink) <= ink_ratio(&light_ink) {
        dark_ink
    } else {
        light_ink
    }
}

/// Summed-area table with a one-cell zero border.
fn integral_image(img: &GrayImage) -> Vec<u64> {
    let (width, height) = img.dimensions();
    let stride = width as usize + 1;
    let mut table = vec![0u64; stride * (height as usize + 1)];
    for y in 0..height as usize {
        let mut row_sum = 0u64;
        for x in 0..width as usize {
            row_sum += img.get_pixel(x as u32, y as u32)[0] as u64;
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
        }
    }
    table
}

fn threshold_polarity(img: &GrayImage, integral: &[u64], dark_ink: bool) -> GrayImage {
    let (width, height) = img.dimensions();
    let stride = width as usize + 1;
    let half = THRESHOLD_BLOCK / 2;
    let mut output = GrayImage::new(width, height);
    for y in 0..height {
        let y0 = y.saturating_sub(half) as usize;
        let y1 = (y + half + 1).min(height) as usize;
        for x in 0..width {
            let x0 = x.saturating_sub(half) as usize;
            let x1 = (x + half + 1).min(width) as usize;
            let area = ((y1 - y0) * (x1 - x0)) as u64;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let local_mean = (sum / area) as i32;
            let value = img.get_pixel(x, y)[0] as i32;
            let is_ink = if dark_ink {
                value + THRESHOLD_OFFSET < local_mean
            } else {
                value > local_mean + THRESHOLD_OFFSET
            };
            output.put_pixel(x, y, image::Luma([if is_ink { 255 } else { 0 }]));
        }
    }
    output
}

fn ink_ratio(binary: &GrayImage) -> f32 {
    let total = (binary.width() * binary.height()).max(1) as f32;
    let ink = binary.pixels().filter(|p| p[0] > 0).count() as f32;
    ink / total
}

/// Geometry filters applied to candidate regions.
pub struct DetectOptions {
    pub min_area: u32,
    pub max_area_ratio: f32,
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Blank rows tolerated inside one horizontal strip.
    pub row_gap: usize,
    /// Blank columns tolerated inside one region.
    pub col_gap: usize,
    pub media_min_area: u32,
    pub media_max_transition_density: f32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            min_area: 80,
            max_area_ratio: 0.5,
            min_aspect: 0.1,
            max_aspect: 30.0,
            row_gap: 3,
            col_gap: 8,
            media_min_area: 8000,
            media_max_transition_density: 0.08,
        }
    }
}

/// Segments a binary image into candidate regions by projecting ink counts
/// onto rows, then onto columns within each row strip. Regions failing the
/// area or aspect filters are dropped.
pub fn detect_text_regions(binary: &GrayImage, options: &DetectOptions) -> Vec<Rectangle> {
    let (width, height) = binary.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let frame_area = (width as f32) * (height as f32);

    let mut row_ink = vec![0u32; height as usize];
    for (_, y, p) in binary.enumerate_pixels() {
        if p[0] > 0 {
            row_ink[y as usize] += 1;
        }
    }

    let mut regions = Vec::new();
    for (y0, y1) in profile_runs(&row_ink, MIN_PROFILE_INK, options.row_gap) {
        let mut col_ink = vec![0u32; width as usize];
        for y in y0..=y1 {
            for x in 0..width as usize {
                if binary.get_pixel(x as u32, y as u32)[0] > 0 {
                    col_ink[x] += 1;
                }
            }
        }
        for (x0, x1) in profile_runs(&col_ink, MIN_PROFILE_INK, options.col_gap) {
            let w = (x1 - x0 + 1) as u32;
            let h = (y1 - y0 + 1) as u32;
            let area = w * h;
            if area < options.min_area {
                continue;
            }
            if area as f32 > frame_area * options.max_area_ratio {
                continue;
            }
            let aspect = w as f32 / h as f32;
            if aspect < options.min_aspect || aspect > options.max_aspect {
                continue;
            }
            regions.push(Rectangle::new(x0 as i32, y0 as i32, w, h));
        }
    }
    regions
}

/// Inclusive runs where the profile meets `min_ink`, merging runs separated
/// by at most `gap` positions.
fn profile_runs(profile: &[u32], min_ink: u32, gap: usize) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (i, &ink) in profile.iter().enumerate() {
        if ink >= min_ink {
            current = match current {
                Some((start, _)) => Some((start, i)),
                None => Some((i, i)),
            };
        } else if let Some((start, end)) = current {
            if i - end > gap {
                runs.push((start, end));
                current = None;
            }
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

/// Whether a detected region looks like an embedded photo or sticker rather
/// than text. Text produces dense ink transitions along rows; photo blobs
/// binarize into large low-transition masses.
pub fn is_media_region(binary: &GrayImage, region: &Rectangle, options: &DetectOptions) -> bool {
    let area = region.area();
    if area < 1 || area < options.media_min_area as u64 {
        return false;
    }
    let (w, h) = binary.dimensions();
    let x0 = region.x.max(0) as u32;
    let y0 = region.y.max(0) as u32;
    if x0 >= w || y0 >= h {
        return false;
    }
    let x1 = (x0 + region.width).min(w);
    let y1 = (y0 + region.height).min(h);
    let mut transitions = 0u32;
    for y in y0..y1 {
        for x in x0 + 1..x1 {
            if binary.get_pixel(x, y)[0] != binary.get_pixel(x - 1, y)[0] {
                transitions += 1;
            }
        }
    }
    let density = transitions as f32 / area as f32;
    density < options.media_max_transition_density
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([value]))
    }

    #[test]
    fn test_downsample_preserves_small_images() {
        let img = filled(800, 600, 128);
        let out = downsample(&img, 1400);
        assert_eq!(out.dimensions(), (800, 600));
    }

    #[test]
    fn test_downsample_limits_longest_side() {
        let img = filled(2800, 1400, 128);
        let out = downsample(&img, 1400);
        assert_eq!(out.dimensions(), (1400, 700));
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let img = filled(100, 100, 50);
        let region = Rectangle::new(90, 90, 50, 50);
        let out = crop(&img, &region);
        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn test_quality_score_uniform_midgray() {
        // No sharpness, no contrast, perfectly balanced brightness.
        let img = filled(32, 32, 128);
        let score = quality_score(&img);
        assert!((score - 0.3).abs() < 0.01, "score was {score}");
    }

    #[test]
    fn test_quality_score_prefers_textured_frames() {
        let flat = filled(32, 32, 250);
        let textured = GrayImage::from_fn(32, 32, |x, y| {
            image::Luma([if (x + y) % 2 == 0 { 40 } else { 215 }])
        });
        assert!(quality_score(&textured) > quality_score(&flat));
    }

    #[test]
    fn test_adaptive_threshold_marks_dark_text_as_ink() {
        let mut img = filled(64, 64, 220);
        for x in 20..40 {
            for y in 30..34 {
                img.put_pixel(x, y, image::Luma([30]));
            }
        }
        let binary = adaptive_threshold(&img);
        assert_eq!(binary.get_pixel(30, 31)[0], 255, "stroke should be ink");
        assert_eq!(binary.get_pixel(5, 5)[0], 0, "background should be clear");
        assert!(ink_ratio(&binary) < 0.5);
    }

    #[test]
    fn test_adaptive_threshold_handles_light_on_dark() {
        let mut img = filled(64, 64, 30);
        for x in 20..40 {
            for y in 30..34 {
                img.put_pixel(x, y, image::Luma([220]));
            }
        }
        let binary = adaptive_threshold(&img);
        assert_eq!(binary.get_pixel(30, 31)[0], 255, "stroke should be ink");
        assert_eq!(binary.get_pixel(5, 5)[0], 0, "background should be clear");
    }

    #[test]
    fn test_detect_two_stacked_regions() {
        let mut binary = filled(200, 200, 0);
        for x in 10..110 {
            for y in 20..40 {
                binary.put_pixel(x, y, image::Luma([255]));
            }
        }
        for x in 80..180 {
            for y in 120..140 {
                binary.put_pixel(x, y, image::Luma([255]));
            }
        }
        let regions = detect_text_regions(&binary, &DetectOptions::default());
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].x, 10);
        assert_eq!(regions[0].y, 20);
        assert_eq!(regions[0].width, 100);
        assert_eq!(regions[0].height, 20);
        assert_eq!(regions[1].y, 120);
    }

    #[test]
    fn test_detect_drops_tiny_and_oversized_regions() {
        let mut binary = filled(100, 100, 0);
        // 6x6 = 36 px, below the minimum area.
        for x in 10..16 {
            for y in 10..16 {
                binary.put_pixel(x, y, image::Luma([255]));
            }
        }
        assert!(detect_text_regions(&binary, &DetectOptions::default()).is_empty());

        // Near-full-frame block exceeds the area ratio cap.
        let full = filled(100, 100, 255);
        assert!(detect_text_regions(&full, &DetectOptions::default()).is_empty());
    }

    #[test]
    fn test_detect_drops_extreme_aspect() {
        let mut binary = filled(400, 100, 0);
        // A 300x2 separator rule.
        for x in 50..350 {
            for y in 50..52 {
                binary.put_pixel(x, y, image::Luma([255]));
            }
        }
        assert!(detect_text_regions(&binary, &DetectOptions::default()).is_empty());
    }

    #[test]
    fn test_media_region_heuristic() {
        // Solid blob: large, almost no transitions.
        let mut binary = filled(300, 300, 0);
        for x in 50..250 {
            for y in 50..150 {
                binary.put_pixel(x, y, image::Luma([255]));
            }
        }
        let blob = Rectangle::new(50, 50, 200, 100);
        let options = DetectOptions::default();
        assert!(is_media_region(&binary, &blob, &options));

        // Striped pattern of the same size transitions constantly, like text.
        let striped = GrayImage::from_fn(300, 300, |x, _| {
            image::Luma([if x % 2 == 0 { 255 } else { 0 }])
        });
        assert!(!is_media_region(&striped, &blob, &options));
    }
}
