//! Text recognition for captured chat frames.
//!
//! This module provides:
//! - Frame preparation and region detection (`preprocess`)
//! - The Tesseract-backed recognition engine (`engine`)
//! - Fingerprint caches over recognized content (`cache`)
//! - The extraction front door used by the pipeline (`gateway`)

pub mod cache;
pub mod engine;
pub mod gateway;
pub mod preprocess;

pub use cache::CacheStats;
pub use engine::{RecognitionEngine, RecognizedLine, TesseractEngine};
pub use gateway::OcrGateway;
