//! Chat window location and control.

use anyhow::Result;

use crate::config::WindowConfig;
use crate::models::{Rectangle, ScrollDirection, WindowInfo};

/// Platform window surface: locating the chat window, focusing it, wheel
/// scrolling and pointer access. The pointer functions back the corner
/// failsafe and keep the wheel aimed at the chat area.
pub trait WindowControl {
    /// Finds the first visible window whose title contains any keyword.
    fn locate(&mut self, keywords: &[String]) -> Result<WindowInfo>;

    /// Restores and focuses the window so wheel input reaches it.
    fn activate(&mut self, window: &WindowInfo) -> Result<()>;

    /// Sends wheel input at the current pointer position.
    fn scroll(&mut self, direction: ScrollDirection, notches: u32) -> Result<()>;

    fn pointer_position(&mut self) -> Result<(i32, i32)>;

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()>;

    fn screen_size(&mut self) -> Result<(u32, u32)>;
}

/// Builds the keyword list for window location: the configured extra title
/// first, then the built-in keywords.
pub fn title_keywords(config: &WindowConfig) -> Vec<String> {
    let mut keywords = Vec::new();
    if let Some(extra) = &config.extra_title {
        if !extra.trim().is_empty() {
            keywords.push(extra.clone());
        }
    }
    keywords.extend(config.title_keywords.iter().cloned());
    keywords
}

/// Case-insensitive substring match against any keyword.
pub fn matches_title(title: &str, keywords: &[String]) -> bool {
    if title.is_empty() {
        return false;
    }
    let lower = title.to_lowercase();
    keywords
        .iter()
        .any(|keyword| !keyword.is_empty() && lower.contains(&keyword.to_lowercase()))
}

/// Estimates the message area inside the window: the contact sidebar on the
/// left, the title bar on top and the input box at the bottom are cut away.
/// An explicit override in config bypasses the estimate entirely.
pub fn estimate_chat_area(window: &Rectangle, config: &WindowConfig) -> Rectangle {
    if let Some(area) = config.chat_area_override {
        return area;
    }
    let sidebar = config.sidebar_width as i64;
    let margin = config.margin as i64;
    let title_bar = config.title_bar_height as i64;
    let input_area = config.input_area_height as i64;

    let x = window.x as i64 + sidebar + margin;
    let y = window.y as i64 + title_bar + margin;
    let width = window.width as i64 - sidebar - 2 * margin;
    let height = window.height as i64 - title_bar - input_area - margin;

    Rectangle::new(x as i32, y as i32, width.max(100) as u32, height.max(100) as u32)
}
