//! Scroll automation for walking a chat history.
//!
//! This module provides:
//! - Frame similarity scoring for change detection
//! - Edge detection with a confirmation step
//! - Rate-limited fixed and progressive scroll strategies
//! - Stall recovery via window re-acquisition

pub mod scroll;
pub mod similarity;

pub use scroll::{
    pointer_in_corner, EdgeDetector, EdgeState, Pacer, RateLimiter, ScrollController,
    ScrollOutcome, ScrollStatistics, SystemPacer, FAILSAFE_MARGIN,
};
pub use similarity::{frame_similarity, ssim};
