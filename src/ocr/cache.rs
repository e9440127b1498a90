//! Recognition result caches keyed by image fingerprints.
//!
//! Two layers: a region cache holding per-crop recognition results and a
//! frame cache holding whole-frame extraction output. Chat screens repeat
//! most of their content between scroll steps, so both layers see high hit
//! rates during a run.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use image::GrayImage;
use lru::LruCache;

use crate::models::TextRegion;

/// Content fingerprint over dimensions and raw pixels. Any pixel change
/// yields a different key, which is what cache invalidation needs here.
pub fn fingerprint(image: &GrayImage) -> u64 {
    let mut hasher = DefaultHasher::new();
    image.width().hash(&mut hasher);
    image.height().hash(&mut hasher);
    image.as_raw().hash(&mut hasher);
    hasher.finish()
}

/// Cached per-region recognition output.
#[derive(Debug, Clone)]
pub struct CachedText {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct RecognitionCache {
    regions: LruCache<u64, CachedText>,
    frames: LruCache<u64, Vec<TextRegion>>,
    region_stats: CacheStats,
    frame_stats: CacheStats,
}

impl RecognitionCache {
    pub fn new(region_capacity: usize, frame_capacity: usize) -> Self {
        let region_cap =
            NonZeroUsize::new(region_capacity.max(1)).expect("non-zero LRU cache capacity");
        let frame_cap =
            NonZeroUsize::new(frame_capacity.max(1)).expect("non-zero LRU cache capacity");
        Self {
            regions: LruCache::new(region_cap),
            frames: LruCache::new(frame_cap),
            region_stats: CacheStats::default(),
            frame_stats: CacheStats::default(),
        }
    }

    pub fn get_region(&mut self, key: u64) -> Option<CachedText> {
        match self.regions.get(&key) {
            Some(cached) => {
                self.region_stats.hits += 1;
                Some(cached.clone())
            }
            None => {
                self.region_stats.misses += 1;
                None
            }
        }
    }

    pub fn put_region(&mut self, key: u64, text: String, confidence: f32) {
        self.regions.put(key, CachedText { text, confidence });
    }

    pub fn get_frame(&mut self, key: u64) -> Option<Vec<TextRegion>> {
        match self.frames.get(&key) {
            Some(regions) => {
                self.frame_stats.hits += 1;
                Some(regions.clone())
            }
            None => {
                self.frame_stats.misses += 1;
                None
            }
        }
    }

    pub fn put_frame(&mut self, key: u64, regions: Vec<TextRegion>) {
        self.frames.put(key, regions);
    }

    pub fn region_stats(&self) -> CacheStats {
        self.region_stats
    }

    pub fn frame_stats(&self) -> CacheStats {
        self.frame_stats
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.frames.clear();
        self.region_stats = CacheStats::default();
        self.frame_stats = CacheStats::default();
    }
}
