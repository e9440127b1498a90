//! Screen capture of the chat area.
//!
//! This module provides:
//! - Window discovery and control (`window`)
//! - The GDI-backed native capture and input backend (`win32`)
//! - A bounded frame history used for scroll similarity checks

pub mod window;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub use win32::NativeBackend;

#[cfg(not(windows))]
mod unsupported;
#[cfg(not(windows))]
pub use unsupported::NativeBackend;

pub use window::{estimate_chat_area, matches_title, title_keywords, WindowControl};

use anyhow::Result;
use chrono::{DateTime, Local};
use image::RgbaImage;
use std::collections::VecDeque;

use crate::models::Rectangle;

/// Produces raw frames of a screen region. The native backend grabs from
/// the display; tests substitute scripted sources.
pub trait FrameSource {
    fn grab(&mut self, bounds: &Rectangle) -> Result<RgbaImage>;
}

/// One captured frame of the chat area.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub sequence: u64,
    pub captured_at: DateTime<Local>,
}

/// Ring buffer of recent frames. Scroll edge detection compares the newest
/// frame against its predecessors, so only a short tail is retained.
pub struct FrameHistory {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    /// The frame captured immediately before the latest one.
    pub fn previous(&self) -> Option<&Frame> {
        if self.frames.len() < 2 {
            return None;
        }
        self.frames.get(self.frames.len() - 2)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Captures frames through a source and maintains their history.
pub struct CaptureEngine {
    source: Box<dyn FrameSource>,
    history: FrameHistory,
    next_sequence: u64,
}

impl CaptureEngine {
    pub fn new(source: Box<dyn FrameSource>, history_capacity: usize) -> Self {
        Self {
            source,
            history: FrameHistory::new(history_capacity),
            next_sequence: 0,
        }
    }

    /// Grabs one frame of the given screen region and records it.
    pub fn capture(&mut self, bounds: &Rectangle) -> Result<Frame> {
        let image = self.source.grab(bounds)?;
        let frame = Frame {
            image,
            sequence: self.next_sequence,
            captured_at: Local::now(),
        };
        self.next_sequence += 1;
        self.history.push(frame.clone());
        Ok(frame)
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn reset_history(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;

    struct SolidSource {
        value: u8,
    }

    impl FrameSource for SolidSource {
        fn grab(&mut self, bounds: &Rectangle) -> Result<RgbaImage> {
            let v = self.value;
            self.value = self.value.wrapping_add(1);
            Ok(RgbaImage::from_pixel(
                bounds.width,
                bounds.height,
                image::Rgba([v, v, v, 255]),
            ))
        }
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn grab(&mut self, _bounds: &Rectangle) -> Result<RgbaImage> {
            Err(ExtractError::CaptureUnavailable("display off".to_string()).into())
        }
    }

    #[test]
    fn test_capture_records_history_and_sequences() {
        let mut engine = CaptureEngine::new(Box::new(SolidSource { value: 10 }), 3);
        let bounds = Rectangle::new(0, 0, 4, 4);
        let first = engine.capture(&bounds).unwrap();
        let second = engine.capture(&bounds).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.history().latest().unwrap().sequence, 1);
        assert_eq!(engine.history().previous().unwrap().sequence, 0);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = FrameHistory::new(2);
        for sequence in 0..3 {
            history.push(Frame {
                image: RgbaImage::new(1, 1),
                sequence,
                captured_at: Local::now(),
            });
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.previous().unwrap().sequence, 1);
        assert_eq!(history.latest().unwrap().sequence, 2);
    }

    #[test]
    fn test_capture_failure_propagates() {
        let mut engine = CaptureEngine::new(Box::new(FailingSource), 3);
        let err = engine.capture(&Rectangle::new(0, 0, 4, 4)).unwrap_err();
        let extract = err.downcast_ref::<ExtractError>().unwrap();
        assert!(matches!(extract, ExtractError::CaptureUnavailable(_)));
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_previous_requires_two_frames() {
        let mut history = FrameHistory::new(3);
        assert!(history.previous().is_none());
        history.push(Frame {
            image: RgbaImage::new(1, 1),
            sequence: 0,
            captured_at: Local::now(),
        });
        assert!(history.previous().is_none());
        assert!(history.latest().is_some());
    }
}
