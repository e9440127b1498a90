//! Classification of recognized text fragments.
//!
//! Separates time/date-only separator lines (rendered by the chat UI
//! between message groups) from conversational content, parses their
//! instant relative to a reference date, and assigns message types from
//! content hints.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Weekday};
use regex::Regex;

use crate::models::MessageType;

// Separator patterns, each matched against the full trimmed text.
// Capture groups feed the time parser.
const ABS_DATE_PATTERN: &str =
    r"^(?:(\d{4})年)?\s*(\d{1,2})月\s*(\d{1,2})日\s*(?:(\d{1,2}):(\d{2})(?::(\d{2}))?)?$";
const BARE_TIME_PATTERN: &str = r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$";
const WEEKDAY_PATTERN: &str =
    r"^(?:星期|周)([一二三四五六日天])\s*(?:(\d{1,2}):(\d{2})(?::(\d{2}))?)?$";
const RELATIVE_DAY_PATTERN: &str =
    r"^(昨天|今天|前天)\s*(?:(\d{1,2}):(\d{2})(?::(\d{2}))?)?$";
const DAY_PART_PATTERN: &str =
    r"^(上午|下午|中午|凌晨|傍晚|晚间|晚上)\s*(\d{1,2}):(\d{2})(?::(\d{2}))?$";
const AM_PM_PATTERN: &str = r"(?i)^(am|pm)\s*(\d{1,2}):(\d{2})(?::(\d{2}))?$";

/// Permissive fallback: digits, whitespace, colons, date units and common
/// separators only.
const TIME_FALLBACK_CHARSET: &str = r"^[0-9\s:年月日/.\-]+$";

/// Detects text fragments that are purely date/time/weekday markers and
/// resolves them to instants.
pub struct TimeSeparatorClassifier {
    abs_date: Regex,
    bare_time: Regex,
    weekday: Regex,
    relative_day: Regex,
    day_part: Regex,
    am_pm: Regex,
    extra: Vec<Regex>,
    fallback: Regex,
}

impl TimeSeparatorClassifier {
    /// Compiles the built-in rules plus caller-supplied extra patterns.
    /// Extra patterns only ever match the full string.
    pub fn new(extra_patterns: &[String]) -> Result<Self> {
        let mut extra = Vec::with_capacity(extra_patterns.len());
        for pattern in extra_patterns {
            extra.push(Regex::new(&format!("^(?:{})$", pattern))?);
        }
        Ok(Self {
            abs_date: Regex::new(ABS_DATE_PATTERN)?,
            bare_time: Regex::new(BARE_TIME_PATTERN)?,
            weekday: Regex::new(WEEKDAY_PATTERN)?,
            relative_day: Regex::new(RELATIVE_DAY_PATTERN)?,
            day_part: Regex::new(DAY_PART_PATTERN)?,
            am_pm: Regex::new(AM_PM_PATTERN)?,
            extra,
            fallback: Regex::new(TIME_FALLBACK_CHARSET)?,
        })
    }

    /// Whether the text is a time-only separator rather than content.
    pub fn is_time_only(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        if self.abs_date.is_match(trimmed)
            || self.bare_time.is_match(trimmed)
            || self.weekday.is_match(trimmed)
            || self.relative_day.is_match(trimmed)
            || self.day_part.is_match(trimmed)
            || self.am_pm.is_match(trimmed)
        {
            return true;
        }
        if self.extra.iter().any(|r| r.is_match(trimmed)) {
            return true;
        }
        // Fallback requires at least one date unit or colon so bare numbers
        // don't qualify.
        self.fallback.is_match(trimmed) && trimmed.contains(['年', '月', '日', ':'])
    }

    /// Resolves a separator to an instant relative to `reference` (the scan
    /// date). Returns None when the text carries no parseable time, in which
    /// case callers keep their previous context.
    pub fn parse_time(&self, text: &str, reference: DateTime<Local>) -> Option<DateTime<Local>> {
        let trimmed = text.trim();

        if let Some(caps) = self.abs_date.captures(trimmed) {
            let year = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(reference.year());
            let month: u32 = caps.get(2)?.as_str().parse().ok()?;
            let day: u32 = caps.get(3)?.as_str().parse().ok()?;
            let time = capture_time(&caps, 4).unwrap_or(NaiveTime::MIN);
            let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
            return local_instant(date.and_time(time));
        }

        if let Some(caps) = self.bare_time.captures(trimmed) {
            let time = capture_time(&caps, 1)?;
            return local_instant(reference.date_naive().and_time(time));
        }

        if let Some(caps) = self.weekday.captures(trimmed) {
            let target = chinese_weekday(caps.get(1)?.as_str())?;
            let days_back = (reference.weekday().num_days_from_monday() + 7
                - target.num_days_from_monday())
                % 7;
            let date = reference.date_naive() - Duration::days(days_back as i64);
            let time = capture_time(&caps, 2).unwrap_or(NaiveTime::MIN);
            return local_instant(date.and_time(time));
        }

        if let Some(caps) = self.relative_day.captures(trimmed) {
            let days_back = match caps.get(1)?.as_str() {
                "今天" => 0,
                "昨天" => 1,
                "前天" => 2,
                _ => return None,
            };
            let date = reference.date_naive() - Duration::days(days_back);
            let time = capture_time(&caps, 2).unwrap_or(NaiveTime::MIN);
            return local_instant(date.and_time(time));
        }

        if let Some(caps) = self.day_part.captures(trimmed) {
            let part = caps.get(1)?.as_str();
            let hour: u32 = caps.get(2)?.as_str().parse().ok()?;
            let minute: u32 = caps.get(3)?.as_str().parse().ok()?;
            let second: u32 = caps
                .get(4)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let hour = adjust_day_part_hour(part, hour);
            let time = NaiveTime::from_hms_opt(hour, minute, second)?;
            return local_instant(reference.date_naive().and_time(time));
        }

        if let Some(caps) = self.am_pm.captures(trimmed) {
            let is_pm = caps.get(1)?.as_str().eq_ignore_ascii_case("pm");
            let hour: u32 = caps.get(2)?.as_str().parse().ok()?;
            let minute: u32 = caps.get(3)?.as_str().parse().ok()?;
            let second: u32 = caps
                .get(4)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let hour = if is_pm && hour < 12 { hour + 12 } else { hour };
            let time = NaiveTime::from_hms_opt(hour, minute, second)?;
            return local_instant(reference.date_naive().and_time(time));
        }

        None
    }
}

/// Reads an H:MM(:SS) group triple starting at `first` from a capture set.
fn capture_time(caps: &regex::Captures, first: usize) -> Option<NaiveTime> {
    let hour: u32 = caps.get(first)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(first + 1)?.as_str().parse().ok()?;
    let second: u32 = caps
        .get(first + 2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    NaiveTime::from_hms_opt(hour, minute, second)
}

fn chinese_weekday(c: &str) -> Option<Weekday> {
    match c {
        "一" => Some(Weekday::Mon),
        "二" => Some(Weekday::Tue),
        "三" => Some(Weekday::Wed),
        "四" => Some(Weekday::Thu),
        "五" => Some(Weekday::Fri),
        "六" => Some(Weekday::Sat),
        "日" | "天" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Converts 12-hour day-part phrasing to a 24-hour clock.
fn adjust_day_part_hour(part: &str, hour: u32) -> u32 {
    match part {
        "下午" | "傍晚" | "晚间" | "晚上" if hour < 12 => hour + 12,
        "中午" if hour < 11 => hour + 12,
        _ => hour,
    }
}

fn local_instant(naive: chrono::NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&naive).single()
}

const IMAGE_HINTS: [&str; 5] = ["[图片]", "图片", "photo", "image", "img"];
const VOICE_HINTS: [&str; 4] = ["[语音]", "语音", "voice", "audio"];
const SYSTEM_HINTS: [&str; 6] = [
    "你已添加",
    "已成为你的朋友",
    "系统消息",
    "joined",
    "left",
    "invited",
];

/// Assigns a message type from content hint keywords. Time separators are
/// handled separately before this runs.
pub fn classify_content(content: &str) -> MessageType {
    let lower = content.to_lowercase();
    if IMAGE_HINTS.iter().any(|h| lower.contains(h)) {
        return MessageType::Image;
    }
    if VOICE_HINTS.iter().any(|h| lower.contains(h)) {
        return MessageType::Voice;
    }
    if SYSTEM_HINTS.iter().any(|h| lower.contains(h)) {
        return MessageType::System;
    }
    if content.trim().is_empty() {
        MessageType::Unknown
    } else {
        MessageType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> TimeSeparatorClassifier {
        TimeSeparatorClassifier::new(&[]).unwrap()
    }

    fn reference() -> DateTime<Local> {
        // A Monday.
        Local.with_ymd_and_hms(2024, 10, 21, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_weekday_separator() {
        let c = classifier();
        assert!(c.is_time_only("周三 20:15"));
        assert!(c.is_time_only("星期五 23:53"));
        assert!(c.is_time_only("星期五23:53"));
        assert!(c.is_time_only("周日"));
    }

    #[test]
    fn test_relative_day_separator() {
        let c = classifier();
        assert!(c.is_time_only("昨天 18:30"));
        assert!(c.is_time_only("昨天"));
        assert!(c.is_time_only("前天 9:05"));
    }

    #[test]
    fn test_am_pm_separator() {
        let c = classifier();
        assert!(c.is_time_only("PM 3:25"));
        assert!(c.is_time_only("am 11:00"));
        assert!(c.is_time_only("下午 3:25"));
    }

    #[test]
    fn test_absolute_date_separator() {
        let c = classifier();
        assert!(c.is_time_only("2024年10月21日23:47"));
        assert!(c.is_time_only("10月21日"));
        assert!(c.is_time_only("14:05"));
        assert!(c.is_time_only("14:05:30"));
    }

    #[test]
    fn test_conversation_not_separator() {
        let c = classifier();
        assert!(!c.is_time_only("好的，明天一起开会"));
        assert!(!c.is_time_only("明天见"));
        assert!(!c.is_time_only("会议改到3点了吗"));
        assert!(!c.is_time_only(""));
    }

    #[test]
    fn test_fallback_requires_date_unit_or_colon() {
        let c = classifier();
        assert!(c.is_time_only("2024年"));
        assert!(!c.is_time_only("12345"));
        assert!(!c.is_time_only("10 20"));
    }

    #[test]
    fn test_extra_patterns_full_match_only() {
        let c = TimeSeparatorClassifier::new(&[r"\d+楼".to_string()]).unwrap();
        assert!(c.is_time_only("3楼"));
        // Substring occurrences must not classify the whole text.
        assert!(!c.is_time_only("我在3楼等你"));
    }

    #[test]
    fn test_extra_pattern_invalid_rejected() {
        assert!(TimeSeparatorClassifier::new(&["(".to_string()]).is_err());
    }

    #[test]
    fn test_parse_absolute_date() {
        let c = classifier();
        let t = c.parse_time("2024年10月21日23:47", reference()).unwrap();
        assert_eq!(
            t,
            Local.with_ymd_and_hms(2024, 10, 21, 23, 47, 0).unwrap()
        );
        // Year defaults to the reference year.
        let t = c.parse_time("10月5日", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_bare_time_uses_reference_date() {
        let c = classifier();
        let t = c.parse_time("14:05", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 21, 14, 5, 0).unwrap());
    }

    #[test]
    fn test_parse_relative_day() {
        let c = classifier();
        let t = c.parse_time("昨天 18:30", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 20, 18, 30, 0).unwrap());
        let t = c.parse_time("前天", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 19, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_weekday_most_recent() {
        let c = classifier();
        // Reference is Monday 2024-10-21; the most recent Wednesday is 10-16.
        let t = c.parse_time("周三 20:15", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 16, 20, 15, 0).unwrap());
        // Same weekday resolves to the reference day itself.
        let t = c.parse_time("周一", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 21, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_twelve_hour_forms() {
        let c = classifier();
        let t = c.parse_time("PM 3:25", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 21, 15, 25, 0).unwrap());
        let t = c.parse_time("下午 3:25", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 21, 15, 25, 0).unwrap());
        let t = c.parse_time("上午 9:00", reference()).unwrap();
        assert_eq!(t, Local.with_ymd_and_hms(2024, 10, 21, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_unparseable_returns_none() {
        let c = classifier();
        assert!(c.parse_time("你撤回了一条消息", reference()).is_none());
        assert!(c.parse_time("2024年", reference()).is_none());
    }

    #[test]
    fn test_classify_content_hints() {
        assert_eq!(classify_content("[图片]"), MessageType::Image);
        assert_eq!(classify_content("发了一张image给你"), MessageType::Image);
        assert_eq!(classify_content("[语音] 12\""), MessageType::Voice);
        assert_eq!(
            classify_content("你已添加了小王，现在可以开始聊天了。"),
            MessageType::System
        );
        assert_eq!(classify_content("好的"), MessageType::Text);
        assert_eq!(classify_content("   "), MessageType::Unknown);
    }
}
