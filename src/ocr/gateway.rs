//! Frame-to-regions extraction front door.
//!
//! Wraps the recognition engine with detection, caching and confidence
//! scoring. Detection runs on a downsampled copy of the frame; recognition
//! runs on crops of the full-resolution grayscale so small glyphs survive.

use anyhow::Result;
use image::{GrayImage, RgbaImage};

use crate::config::RecognitionConfig;
use crate::models::{Rectangle, TextRegion};
use crate::ocr::cache::{fingerprint, CacheStats, RecognitionCache};
use crate::ocr::engine::RecognitionEngine;
use crate::ocr::preprocess::{
    adaptive_threshold, crop, detect_text_regions, downsample, is_media_region, quality_score,
    to_grayscale, DetectOptions,
};

/// Padding added around detected rectangles before cropping for recognition.
const CROP_PADDING: i32 = 4;

/// Weights for blending recognition confidence with image quality.
const RECOGNITION_WEIGHT: f32 = 0.7;
const QUALITY_WEIGHT: f32 = 0.3;

pub struct OcrGateway {
    engine: Box<dyn RecognitionEngine>,
    cache: RecognitionCache,
    detect_options: DetectOptions,
    confidence_threshold: f32,
    max_regions: usize,
    downsample_max_side: u32,
}

impl OcrGateway {
    pub fn new(engine: Box<dyn RecognitionEngine>, config: &RecognitionConfig) -> Self {
        let detect_options = DetectOptions {
            min_area: config.min_region_area,
            max_area_ratio: config.max_area_ratio,
            ..DetectOptions::default()
        };
        Self {
            engine,
            cache: RecognitionCache::new(config.region_cache_size, config.frame_cache_size),
            detect_options,
            confidence_threshold: config.confidence_threshold,
            max_regions: config.max_regions,
            downsample_max_side: config.downsample_max_side,
        }
    }

    /// Extracts positioned text regions from a captured frame. Returns an
    /// empty vector when nothing recognizable is on screen.
    pub fn extract(&mut self, frame: &RgbaImage) -> Result<Vec<TextRegion>> {
        let gray = to_grayscale(frame);
        let frame_key = fingerprint(&gray);
        if let Some(cached) = self.cache.get_frame(frame_key) {
            return Ok(cached);
        }

        let detection = downsample(&gray, self.downsample_max_side);
        let scale = gray.width().max(gray.height()) as f32
            / detection.width().max(detection.height()).max(1) as f32;
        let binary = adaptive_threshold(&detection);

        let mut candidates = detect_text_regions(&binary, &self.detect_options);
        candidates.sort_by(|a, b| b.area().cmp(&a.area()));
        candidates.truncate(self.max_regions);

        let mut regions = Vec::new();
        for candidate in &candidates {
            let media_hint = is_media_region(&binary, candidate, &self.detect_options);
            let bounds = scale_rect(candidate, scale);
            let padded = Rectangle::new(
                bounds.x - CROP_PADDING,
                bounds.y - CROP_PADDING,
                bounds.width + 2 * CROP_PADDING as u32,
                bounds.height + 2 * CROP_PADDING as u32,
            );
            let region_img = crop(&gray, &padded);
            if region_img.width() == 0 || region_img.height() == 0 {
                continue;
            }

            let region_key = fingerprint(&region_img);
            let (text, recognition) = match self.cache.get_region(region_key) {
                Some(cached) => (cached.text, cached.confidence),
                None => {
                    let lines = self.engine.recognize(&region_img)?;
                    let text = lines
                        .iter()
                        .map(|l| l.text.trim())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n");
                    let recognition = if lines.is_empty() {
                        0.0
                    } else {
                        lines.iter().map(|l| l.confidence).sum::<f32>() / lines.len() as f32
                    };
                    self.cache.put_region(region_key, text.clone(), recognition);
                    (text, recognition)
                }
            };

            if text.trim().is_empty() {
                if media_hint {
                    let mut media = TextRegion::new(bounds);
                    media.is_media = true;
                    regions.push(media);
                }
                continue;
            }

            let quality = quality_score(&region_img);
            let combined = combined_confidence(recognition, quality);
            if combined < self.confidence_threshold {
                // Recognition too weak to trust; a media-looking blob still
                // counts as media.
                if media_hint {
                    let mut media = TextRegion::new(bounds);
                    media.is_media = true;
                    regions.push(media);
                }
                continue;
            }

            regions.push(TextRegion {
                text,
                bounds,
                confidence: combined,
                is_media: false,
            });
        }

        if regions.is_empty() {
            regions = self.full_frame_fallback(&detection, scale)?;
        }

        self.cache.put_frame(frame_key, regions.clone());
        Ok(regions)
    }

    /// Last resort when detection yields nothing: recognize the whole frame
    /// and keep lines that clear the confidence threshold.
    fn full_frame_fallback(&mut self, detection: &GrayImage, scale: f32) -> Result<Vec<TextRegion>> {
        let lines = self.engine.recognize(detection)?;
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let quality = quality_score(detection);
        let mut regions = Vec::new();
        for line in lines {
            if line.text.trim().is_empty() {
                continue;
            }
            let combined = combined_confidence(line.confidence, quality);
            if combined < self.confidence_threshold {
                continue;
            }
            regions.push(TextRegion {
                text: line.text,
                bounds: scale_rect(&line.bounds, scale),
                confidence: combined,
                is_media: false,
            });
        }
        Ok(regions)
    }

    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.cache.region_stats(), self.cache.frame_stats())
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

fn combined_confidence(recognition: f32, quality: f32) -> f32 {
    (RECOGNITION_WEIGHT * recognition + QUALITY_WEIGHT * quality).clamp(0.0, 1.0)
}

fn scale_rect(rect: &Rectangle, scale: f32) -> Rectangle {
    Rectangle::new(
        (rect.x as f32 * scale).round() as i32,
        (rect.y as f32 * scale).round() as i32,
        ((rect.width as f32 * scale).round() as u32).max(1),
        ((rect.height as f32 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::engine::RecognizedLine;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeEngine {
        lines: Vec<RecognizedLine>,
        calls: Rc<Cell<usize>>,
    }

    impl RecognitionEngine for FakeEngine {
        fn recognize(&self, _img: &GrayImage) -> Result<Vec<RecognizedLine>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.lines.clone())
        }

        fn language(&self) -> &str {
            "chi_sim"
        }
    }

    fn fake_engine(text: &str, confidence: f32) -> (Box<dyn RecognitionEngine>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let engine = FakeEngine {
            lines: if text.is_empty() {
                Vec::new()
            } else {
                vec![RecognizedLine {
                    text: text.to_string(),
                    confidence,
                    bounds: Rectangle::new(0, 0, 50, 18),
                }]
            },
            calls: Rc::clone(&calls),
        };
        (Box::new(engine), calls)
    }

    fn frame_with_block(
        width: u32,
        height: u32,
        block: Rectangle,
        background: u8,
        ink: u8,
    ) -> RgbaImage {
        let mut frame = RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([background, background, background, 255]),
        );
        for x in block.x as u32..(block.x as u32 + block.width) {
            for y in block.y as u32..(block.y as u32 + block.height) {
                frame.put_pixel(x, y, image::Rgba([ink, ink, ink, 255]));
            }
        }
        frame
    }

    #[test]
    fn test_extract_recognizes_detected_region() {
        let (engine, _calls) = fake_engine("你好", 0.9);
        let mut gateway = OcrGateway::new(engine, &RecognitionConfig::default());
        let frame = frame_with_block(200, 200, Rectangle::new(10, 20, 100, 20), 220, 30);
        let regions = gateway.extract(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "你好");
        assert!(regions[0].confidence >= 0.7);
        assert!(!regions[0].is_media);
        assert_eq!(regions[0].bounds.x, 10);
        assert_eq!(regions[0].bounds.y, 20);
    }

    #[test]
    fn test_second_extract_served_from_frame_cache() {
        let (engine, calls) = fake_engine("你好", 0.9);
        let mut gateway = OcrGateway::new(engine, &RecognitionConfig::default());
        let frame = frame_with_block(200, 200, Rectangle::new(10, 20, 100, 20), 220, 30);
        let first = gateway.extract(&frame).unwrap();
        let engine_calls_after_first = calls.get();
        let second = gateway.extract(&frame).unwrap();
        assert_eq!(calls.get(), engine_calls_after_first);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].text, second[0].text);
        assert_eq!(gateway.cache_stats().1.hits, 1);
    }

    #[test]
    fn test_region_cache_reused_across_differing_frames() {
        let (engine, calls) = fake_engine("你好", 0.9);
        let mut gateway = OcrGateway::new(engine, &RecognitionConfig::default());
        let frame_a = frame_with_block(200, 200, Rectangle::new(10, 20, 100, 20), 220, 30);
        // Same text block plus a distant speck: new frame fingerprint, same
        // region crop.
        let mut frame_b = frame_a.clone();
        for x in 150..156 {
            for y in 150..156 {
                frame_b.put_pixel(x, y, image::Rgba([30, 30, 30, 255]));
            }
        }
        gateway.extract(&frame_a).unwrap();
        let calls_after_a = calls.get();
        assert_eq!(calls_after_a, 1);
        let regions = gateway.extract(&frame_b).unwrap();
        assert_eq!(calls.get(), calls_after_a, "crop should hit the region cache");
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_low_confidence_region_rejected() {
        let (engine, calls) = fake_engine("噪", 0.1);
        let mut gateway = OcrGateway::new(engine, &RecognitionConfig::default());
        let frame = frame_with_block(200, 200, Rectangle::new(10, 20, 100, 20), 220, 30);
        let regions = gateway.extract(&frame).unwrap();
        assert!(regions.is_empty());
        // Region pass plus the full-frame fallback.
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_media_blob_without_text_reported_as_media() {
        let (engine, _calls) = fake_engine("", 0.0);
        let mut gateway = OcrGateway::new(engine, &RecognitionConfig::default());
        let frame = frame_with_block(400, 300, Rectangle::new(20, 30, 150, 100), 220, 40);
        let regions = gateway.extract(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].is_media);
        assert!(regions[0].text.is_empty());
    }

    #[test]
    fn test_recognition_overrides_media_hint() {
        // Same big blob, but the engine reads confident text from it.
        let (engine, _calls) = fake_engine("会议纪要全文", 0.95);
        let mut gateway = OcrGateway::new(engine, &RecognitionConfig::default());
        let frame = frame_with_block(400, 300, Rectangle::new(20, 30, 150, 100), 220, 40);
        let regions = gateway.extract(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert!(!regions[0].is_media);
        assert_eq!(regions[0].text, "会议纪要全文");
    }

    #[test]
    fn test_detection_coordinates_scaled_back_to_frame() {
        let (engine, _calls) = fake_engine("标题", 0.9);
        let mut gateway = OcrGateway::new(engine, &RecognitionConfig::default());
        // 2800px wide frame downsamples by 2 for detection.
        let frame = frame_with_block(2800, 600, Rectangle::new(200, 400, 400, 80), 220, 30);
        let regions = gateway.extract(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        let bounds = &regions[0].bounds;
        assert!((bounds.x - 200).abs() <= 10, "x was {}", bounds.x);
        assert!((bounds.y - 400).abs() <= 10, "y was {}", bounds.y);
        assert!((bounds.width as i32 - 400).abs() <= 16, "w was {}", bounds.width);
        assert!((bounds.height as i32 - 80).abs() <= 16, "h was {}", bounds.height);
    }

    #[test]
    fn test_max_regions_caps_recognition() {
        let (engine, calls) = fake_engine("行", 0.9);
        let config = RecognitionConfig {
            max_regions: 1,
            ..RecognitionConfig::default()
        };
        let mut gateway = OcrGateway::new(engine, &config);
        let mut frame = frame_with_block(300, 300, Rectangle::new(10, 20, 200, 30), 220, 30);
        for x in 10..110 {
            for y in 120..140 {
                frame.put_pixel(x, y, image::Rgba([30, 30, 30, 255]));
            }
        }
        let regions = gateway.extract(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(calls.get(), 1);
        // The larger block wins the cap.
        assert_eq!(regions[0].bounds.y, 20);
    }
}
