//! Turns positioned text regions into structured chat messages.

pub mod classify;

use anyhow::Result;
use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::models::{Message, MessageType, ScrollDirection, TextRegion};
use classify::{classify_content, TimeSeparatorClassifier};

/// Geometry thresholds for grouping regions into bubbles.
pub struct ParseOptions {
    /// Max vertical gap between consecutive regions of one bubble, px.
    pub vertical_gap: i32,
    /// Max horizontal offset between consecutive regions of one bubble, px.
    pub horizontal_gap: i32,
    /// Fixed sender split line; inferred from region positions when None.
    pub split_x: Option<i32>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            vertical_gap: 12,
            horizontal_gap: 40,
            split_x: None,
        }
    }
}

/// Groups recognized regions into bubbles and assigns sender, type and
/// content. Sender attribution is positional: right-aligned bubbles belong
/// to the account owner, left-aligned ones to the peer. Quoted replies
/// rendered inside a bubble keep the bubble's sender.
pub struct MessageParser {
    options: ParseOptions,
    classifier: TimeSeparatorClassifier,
}

impl MessageParser {
    pub fn new(options: ParseOptions, extra_time_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            options,
            classifier: TimeSeparatorClassifier::new(extra_time_patterns)?,
        })
    }

    /// Parses one frame's regions into messages, ordered top to bottom.
    pub fn parse(&self, regions: &[TextRegion]) -> Vec<Message> {
        let mut usable: Vec<&TextRegion> = regions
            .iter()
            .filter(|r| !r.text.trim().is_empty() || r.is_media)
            .collect();
        if usable.is_empty() {
            return Vec::new();
        }
        usable.sort_by_key(|r| (r.bounds.y, r.bounds.x));

        let split_x = self.options.split_x.unwrap_or_else(|| {
            usable.iter().map(|r| r.bounds.x).sum::<i32>() / usable.len() as i32
        });

        let mut messages = Vec::new();
        let mut bubble: Vec<&TextRegion> = vec![usable[0]];
        for region in &usable[1..] {
            let last = bubble[bubble.len() - 1];
            let v_gap = (region.bounds.y - last.bounds.y).abs();
            let h_gap = (region.bounds.x - last.bounds.x).abs();
            if v_gap <= self.options.vertical_gap && h_gap <= self.options.horizontal_gap {
                bubble.push(region);
            } else {
                if let Some(message) = self.bubble_to_message(&bubble, split_x) {
                    messages.push(message);
                }
                bubble = vec![region];
            }
        }
        if let Some(message) = self.bubble_to_message(&bubble, split_x) {
            messages.push(message);
        }
        messages
    }

    fn bubble_to_message(&self, bubble: &[&TextRegion], split_x: i32) -> Option<Message> {
        let content: String = bubble
            .iter()
            .map(|r| r.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let raw_text: String = bubble
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let confidence =
            bubble.iter().map(|r| r.confidence).sum::<f32>() / bubble.len() as f32;
        let all_media = bubble.iter().all(|r| r.is_media);
        let first_x = bubble[0].bounds.x;
        let positional_sender = if first_x > split_x { "我" } else { "对方" };

        let (sender, content, message_type) = if !content.is_empty()
            && self.classifier.is_time_only(&content)
        {
            ("系统".to_string(), content, MessageType::System)
        } else if content.is_empty() {
            if !all_media {
                return None;
            }
            (
                positional_sender.to_string(),
                "[图片]".to_string(),
                MessageType::Image,
            )
        } else {
            let message_type = classify_content(&content);
            (positional_sender.to_string(), content, message_type)
        };

        Some(Message {
            id: Uuid::new_v4().to_string(),
            sender,
            content,
            message_type,
            timestamp: Local::now(),
            confidence_score: confidence,
            raw_text,
        })
    }

    /// Propagates separator times onto surrounding messages. Iteration runs
    /// oldest-first so each separator's time carries forward onto the
    /// messages below it on screen; for upward scans the accumulated list is
    /// newest-first, hence the reversed walk.
    pub fn fill_message_times(
        &self,
        messages: &mut [Message],
        direction: ScrollDirection,
        reference: DateTime<Local>,
    ) {
        let len = messages.len();
        let mut current: Option<DateTime<Local>> = None;
        for step in 0..len {
            let i = match direction {
                ScrollDirection::Up => len - 1 - step,
                ScrollDirection::Down => step,
            };
            let message = &mut messages[i];
            if message.message_type == MessageType::System {
                if let Some(parsed) = self.classifier.parse_time(&message.content, reference) {
                    current = Some(parsed);
                }
            }
            if let Some(time) = current {
                message.timestamp = time;
            }
        }
    }
}
