//! Export writers for extracted messages.
//!
//! Each run writes `prefix_YYYYMMDD_HHMMSS.ext` files into the output
//! directory, one per configured format. Append mode switches JSON to JSON
//! Lines and reuses a fixed filename so repeated runs accumulate.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::Value;

use crate::config::OutputConfig;
use crate::models::{Message, MessageType};

const CSV_COLUMNS: [&str; 7] = [
    "id",
    "sender",
    "content",
    "message_type",
    "timestamp",
    "confidence_score",
    "raw_text",
];

/// Writes one batch in every configured format. Returns the paths written.
pub fn export_messages(
    messages: &[Message],
    config: &OutputConfig,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut formats = vec![config.format.clone()];
    if let Some(extra) = &config.formats {
        for format in extra {
            if !formats.contains(format) {
                formats.push(format.clone());
            }
        }
    }
    let retained: Vec<&Message> = if config.exclude_time_only {
        messages
            .iter()
            .filter(|m| m.message_type != MessageType::System)
            .collect()
    } else {
        messages.iter().collect()
    };

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut written = Vec::new();
    for format in &formats {
        let path = if config.append {
            output_dir.join(format!("{}.{}", config.prefix, format))
        } else {
            output_dir.join(format!("{}_{}.{}", config.prefix, stamp, format))
        };
        match format.as_str() {
            "json" => write_json(&retained, config, &path)?,
            "csv" => write_csv(&retained, config, &path)?,
            "txt" => write_txt(&retained, &path, config.append)?,
            "md" => write_markdown(&retained, &path, config.append)?,
            other => {
                crate::log(&format!("Unknown export format \"{other}\", skipped"));
                continue;
            }
        }
        written.push(path);
    }
    Ok(written)
}

/// Message as a JSON object with excluded fields removed.
fn message_value(message: &Message, exclude: &[String]) -> Result<Value> {
    let mut value = serde_json::to_value(message).context("Failed to serialize message")?;
    if let Value::Object(map) = &mut value {
        for field in exclude {
            map.remove(field);
        }
    }
    Ok(value)
}

fn open_output(path: &Path, append: bool) -> Result<(File, bool)> {
    if append {
        let fresh = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        Ok((file, fresh))
    } else {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok((file, true))
    }
}

fn write_json(messages: &[&Message], config: &OutputConfig, path: &Path) -> Result<()> {
    if config.append {
        let (mut file, _) = open_output(path, true)?;
        for message in messages {
            let value = message_value(message, &config.exclude_fields)?;
            writeln!(file, "{value}").context("Failed to write JSON line")?;
        }
        return Ok(());
    }
    let values = messages
        .iter()
        .map(|m| message_value(m, &config.exclude_fields))
        .collect::<Result<Vec<_>>>()?;
    let body = serde_json::to_string_pretty(&values).context("Failed to serialize messages")?;
    fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_field(value: &Value, column: &str) -> String {
    match value.get(column) {
        Some(Value::String(s)) => csv_escape(s),
        Some(Value::Null) | None => String::new(),
        Some(other) => csv_escape(&other.to_string()),
    }
}

fn write_csv(messages: &[&Message], config: &OutputConfig, path: &Path) -> Result<()> {
    let columns: Vec<&str> = CSV_COLUMNS
        .iter()
        .copied()
        .filter(|c| !config.exclude_fields.iter().any(|e| e == c))
        .collect();
    let (mut file, fresh) = open_output(path, config.append)?;
    if fresh {
        writeln!(file, "{}", columns.join(",")).context("Failed to write CSV header")?;
    }
    for message in messages {
        let value = message_value(message, &[])?;
        let row: Vec<String> = columns.iter().map(|c| csv_field(&value, c)).collect();
        writeln!(file, "{}", row.join(",")).context("Failed to write CSV row")?;
    }
    Ok(())
}

fn write_txt(messages: &[&Message], path: &Path, append: bool) -> Result<()> {
    let (mut file, _) = open_output(path, append)?;
    for message in messages {
        writeln!(
            file,
            "[{}] {} ({}): {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.sender,
            message.message_type.as_str(),
            message.content.replace('\n', " ")
        )
        .context("Failed to write text line")?;
    }
    Ok(())
}

fn write_markdown(messages: &[&Message], path: &Path, append: bool) -> Result<()> {
    let (mut file, fresh) = open_output(path, append)?;
    if fresh {
        writeln!(file, "# WeChat Chat Export\n").context("Failed to write heading")?;
    }
    for message in messages {
        writeln!(
            file,
            "- **{}** `{}` ({}): {}",
            message.sender,
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.message_type.as_str(),
            message.content.replace('\n', " ")
        )
        .context("Failed to write markdown item")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn message(sender: &str, content: &str) -> Message {
        Message {
            id: "m-1".to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            timestamp: Local.with_ymd_and_hms(2024, 10, 21, 14, 30, 0).unwrap(),
            confidence_score: 0.92,
            raw_text: "raw".to_string(),
        }
    }

    #[test]
    fn test_json_export_is_pretty_array_with_exclusions() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            exclude_fields: vec!["raw_text".to_string()],
            ..OutputConfig::default()
        };
        let paths = export_messages(&[message("小王", "好的")], &config, dir.path()).unwrap();
        assert_eq!(paths.len(), 1);
        let name = paths[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("extraction_"), "name was {name}");
        assert!(name.ends_with(".json"));

        let parsed: Vec<Value> = serde_json::from_str(&fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["sender"], "小王");
        assert!(parsed[0].get("raw_text").is_none());
    }

    #[test]
    fn test_json_append_mode_writes_lines() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            append: true,
            ..OutputConfig::default()
        };
        export_messages(&[message("小王", "好的")], &config, dir.path()).unwrap();
        export_messages(&[message("小李", "收到")], &config, dir.path()).unwrap();

        let raw = fs::read_to_string(dir.path().join("extraction.json")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert!(value.get("sender").is_some());
        }
    }

    #[test]
    fn test_csv_export_escapes_and_excludes() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            format: "csv".to_string(),
            exclude_fields: vec!["raw_text".to_string()],
            ..OutputConfig::default()
        };
        let paths =
            export_messages(&[message("小王", "第一句, 第二句")], &config, dir.path()).unwrap();
        let raw = fs::read_to_string(&paths[0]).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines[0], "id,sender,content,message_type,timestamp,confidence_score");
        assert!(lines[1].contains("\"第一句, 第二句\""));
    }

    #[test]
    fn test_csv_append_writes_header_once() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            format: "csv".to_string(),
            append: true,
            ..OutputConfig::default()
        };
        export_messages(&[message("小王", "好的")], &config, dir.path()).unwrap();
        export_messages(&[message("小李", "收到")], &config, dir.path()).unwrap();

        let raw = fs::read_to_string(dir.path().join("extraction.csv")).unwrap();
        let headers = raw.lines().filter(|l| l.starts_with("id,sender")).count();
        assert_eq!(headers, 1);
        assert_eq!(raw.lines().count(), 3);
    }

    #[test]
    fn test_txt_export_line_shape() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            format: "txt".to_string(),
            ..OutputConfig::default()
        };
        let paths = export_messages(&[message("小王", "好的")], &config, dir.path()).unwrap();
        let raw = fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(raw, "[2024-10-21 14:30:00] 小王 (text): 好的\n");
    }

    #[test]
    fn test_markdown_export_has_heading_and_items() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            format: "md".to_string(),
            ..OutputConfig::default()
        };
        let paths = export_messages(&[message("小王", "好的")], &config, dir.path()).unwrap();
        let raw = fs::read_to_string(&paths[0]).unwrap();
        assert!(raw.starts_with("# WeChat Chat Export\n"));
        assert!(raw.contains("- **小王** `2024-10-21 14:30:00` (text): 好的"));
    }

    #[test]
    fn test_multiple_formats_from_one_call() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            formats: Some(vec!["txt".to_string(), "json".to_string()]),
            ..OutputConfig::default()
        };
        let paths = export_messages(&[message("小王", "好的")], &config, dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        let extensions: Vec<String> = paths
            .iter()
            .map(|p| p.extension().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(extensions, vec!["json", "txt"]);
    }

    #[test]
    fn test_exclude_time_only_drops_separators() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            format: "txt".to_string(),
            exclude_time_only: true,
            ..OutputConfig::default()
        };
        let mut separator = message("系统", "昨天 18:30");
        separator.message_type = MessageType::System;
        let paths =
            export_messages(&[separator, message("小王", "好的")], &config, dir.path()).unwrap();
        let raw = fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.contains("小王"));
    }
}
