//! Core data types shared across the pipeline.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a parsed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    /// Time/date separators and membership notices.
    System,
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Voice => "voice",
            MessageType::System => "system",
            MessageType::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "voice" => Ok(MessageType::Voice),
            "system" => Ok(MessageType::System),
            "unknown" => Ok(MessageType::Unknown),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

/// One extracted chat message.
///
/// `sender` may be a display name or a saved alias. On quoted-reply
/// previews the recognized name can be the alias rather than the original
/// sender; callers must treat `sender` on such messages as unreliable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// External stable identifier, empty when unavailable. The parser mints
    /// random v4 UUIDs here; those do not participate in `stable_key`.
    pub id: String,
    pub sender: String,
    pub content: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Local>,
    pub confidence_score: f32,
    /// Unnormalized recognized text, kept for diagnostics.
    #[serde(default)]
    pub raw_text: String,
}

impl Message {
    /// Deterministic key used for duplicate detection across batches and runs.
    ///
    /// A non-empty `id` wins, unless it parses as a random (v4) UUID: those
    /// are minted fresh per capture and would defeat content-level dedup.
    /// The fallback key truncates the timestamp to whole seconds and trims
    /// the content.
    pub fn stable_key(&self) -> String {
        if !self.id.is_empty() {
            match Uuid::parse_str(&self.id) {
                Ok(parsed) if parsed.get_version_num() == 4 => {}
                _ => return self.id.clone(),
            }
        }
        format!(
            "{}|{}|{}",
            self.sender,
            self.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            self.content.trim()
        )
    }

    /// Secondary key for aggressive dedup: sender and content only,
    /// lowercased, ignoring the timestamp.
    pub fn content_key(&self) -> String {
        format!(
            "{}|{}",
            self.sender.trim().to_lowercase(),
            self.content.trim().to_lowercase()
        )
    }
}

/// Axis-aligned box in screen or frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (
            self.x + self.width as i32 / 2,
            self.y + self.height as i32 / 2,
        )
    }
}

/// A candidate region within a captured frame.
#[derive(Debug, Clone)]
pub struct TextRegion {
    pub text: String,
    pub bounds: Rectangle,
    pub confidence: f32,
    /// Heuristic picture/media flag from area, aspect ratio and edge
    /// density. A later recognition pass yielding text overrides it.
    pub is_media: bool,
}

impl TextRegion {
    pub fn new(bounds: Rectangle) -> Self {
        Self {
            text: String::new(),
            bounds,
            confidence: 0.0,
            is_media: false,
        }
    }
}

/// Located chat application window.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub handle: isize,
    pub bounds: Rectangle,
    pub title: String,
}

/// Viewport scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        }
    }
}

impl std::str::FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            other => Err(format!("invalid scroll direction: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_message(id: &str, sender: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            timestamp: Local.with_ymd_and_hms(2024, 10, 21, 23, 47, 5).unwrap(),
            confidence_score: 0.9,
            raw_text: String::new(),
        }
    }

    #[test]
    fn test_stable_key_uses_business_id() {
        let msg = sample_message("abc", "Bob", "Hi");
        assert_eq!(msg.stable_key(), "abc");
    }

    #[test]
    fn test_stable_key_deterministic() {
        let msg = sample_message("", "Bob", "  Hi  ");
        assert_eq!(msg.stable_key(), msg.stable_key());
        assert_eq!(msg.stable_key(), "Bob|2024-10-21T23:47:05|Hi");
    }

    #[test]
    fn test_stable_key_ignores_random_uuid() {
        let random_id = Uuid::new_v4().to_string();
        let with_uuid = sample_message(&random_id, "Bob", "Hi");
        let without_id = sample_message("", "Bob", "Hi");
        assert_eq!(with_uuid.stable_key(), without_id.stable_key());
    }

    #[test]
    fn test_stable_key_keeps_non_random_uuid() {
        // v5 UUIDs are name-derived and therefore stable identifiers.
        let v5 = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"msg-1").to_string();
        let msg = sample_message(&v5, "Bob", "Hi");
        assert_eq!(msg.stable_key(), v5);
    }

    #[test]
    fn test_content_key_normalizes() {
        let a = sample_message("", "小王", "好的 ");
        let b = sample_message("", " 小王 ", "好的");
        assert_eq!(a.content_key(), b.content_key());
    }

    #[test]
    fn test_rectangle_helpers() {
        let rect = Rectangle::new(10, 20, 100, 50);
        assert_eq!(rect.area(), 5000);
        assert!((rect.aspect_ratio() - 2.0).abs() < f32::EPSILON);
        assert_eq!(rect.center(), (60, 45));
    }

    #[test]
    fn test_message_type_round_trip() {
        for t in [
            MessageType::Text,
            MessageType::Image,
            MessageType::Voice,
            MessageType::System,
            MessageType::Unknown,
        ] {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
    }
}
