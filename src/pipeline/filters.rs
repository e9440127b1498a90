//! Post-extraction message filtering.

use chrono::{DateTime, Local};

use crate::models::{Message, MessageType};

/// Optional criteria applied to the accumulated messages before export.
/// Unset fields do not constrain the result.
#[derive(Debug, Default, Clone)]
pub struct MessageFilter {
    /// Case-insensitive sender substring.
    pub sender_contains: Option<String>,
    /// Inclusive lower timestamp bound.
    pub start_time: Option<DateTime<Local>>,
    /// Inclusive upper timestamp bound.
    pub end_time: Option<DateTime<Local>>,
    pub types: Option<Vec<MessageType>>,
    /// Case-insensitive content substring.
    pub content_contains: Option<String>,
    pub min_confidence: Option<f32>,
}

impl MessageFilter {
    pub fn is_unconstrained(&self) -> bool {
        self.sender_contains.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.types.is_none()
            && self.content_contains.is_none()
            && self.min_confidence.is_none()
    }

    pub fn matches(&self, message: &Message) -> bool {
        if let Some(sender) = &self.sender_contains {
            if !message
                .sender
                .to_lowercase()
                .contains(&sender.to_lowercase())
            {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if message.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if message.timestamp > end {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.contains(&message.message_type) {
                return false;
            }
        }
        if let Some(content) = &self.content_contains {
            if !message
                .content
                .to_lowercase()
                .contains(&content.to_lowercase())
            {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if message.confidence_score < min {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        if self.is_unconstrained() {
            return messages;
        }
        messages.into_iter().filter(|m| self.matches(m)).collect()
    }
}
