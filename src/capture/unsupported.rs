//! Stub backend for non-Windows builds. Every operation reports the
//! platform limitation; parsing, dedup and export remain usable.

use anyhow::Result;
use image::RgbaImage;

use super::window::WindowControl;
use super::FrameSource;
use crate::error::ExtractError;
use crate::models::{Rectangle, ScrollDirection, WindowInfo};

const UNSUPPORTED: &str = "screen capture requires Windows";

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl WindowControl for NativeBackend {
    fn locate(&mut self, keywords: &[String]) -> Result<WindowInfo> {
        let _ = keywords;
        Err(ExtractError::WindowNotFound(UNSUPPORTED.to_string()).into())
    }

    fn activate(&mut self, _window: &WindowInfo) -> Result<()> {
        Err(ExtractError::CaptureUnavailable(UNSUPPORTED.to_string()).into())
    }

    fn scroll(&mut self, _direction: ScrollDirection, _notches: u32) -> Result<()> {
        Err(ExtractError::CaptureUnavailable(UNSUPPORTED.to_string()).into())
    }

    fn pointer_position(&mut self) -> Result<(i32, i32)> {
        Err(ExtractError::CaptureUnavailable(UNSUPPORTED.to_string()).into())
    }

    fn move_pointer(&mut self, _x: i32, _y: i32) -> Result<()> {
        Err(ExtractError::CaptureUnavailable(UNSUPPORTED.to_string()).into())
    }

    fn screen_size(&mut self) -> Result<(u32, u32)> {
        Err(ExtractError::CaptureUnavailable(UNSUPPORTED.to_string()).into())
    }
}

impl FrameSource for NativeBackend {
    fn grab(&mut self, _bounds: &Rectangle) -> Result<RgbaImage> {
        Err(ExtractError::CaptureUnavailable(UNSUPPORTED.to_string()).into())
    }
}
