//! Iteration metrics sink with size-based rotation.
//!
//! Snapshots append to one file per run configuration. When the file grows
//! past the configured limit it rotates through numbered generations
//! (base -> .1 -> .2, oldest dropped) and a fresh tabular file restarts
//! with its header row.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::json;

use crate::config::WatchdogConfig;

const CSV_HEADER: &str = "timestamp,status,messages,attempts,cpu_percent,memory_mb";

/// One metrics row.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub status: String,
    pub messages: usize,
    pub attempts: u32,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricsFormat {
    Csv,
    JsonLines,
}

pub struct MetricsSink {
    path: PathBuf,
    format: MetricsFormat,
    max_bytes: Option<u64>,
    rotate_count: usize,
}

impl MetricsSink {
    /// Builds a sink from the watchdog settings. Returns None when no
    /// metrics file is configured. Relative paths land in the output
    /// directory.
    pub fn from_config(config: &WatchdogConfig, output_dir: &Path) -> Option<Self> {
        let file = config.metrics_file.as_ref()?;
        let path = if Path::new(file).is_absolute() {
            PathBuf::from(file)
        } else {
            output_dir.join(file)
        };
        let format = if config.metrics_format.eq_ignore_ascii_case("json") {
            MetricsFormat::JsonLines
        } else {
            MetricsFormat::Csv
        };
        let max_bytes = config
            .max_file_size_mb
            .map(|mb| (mb * 1024.0 * 1024.0) as u64);
        Some(Self {
            path,
            format,
            max_bytes,
            rotate_count: config.rotate_count.max(1),
        })
    }

    pub fn record(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        self.rotate_if_needed()?;
        let fresh = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open metrics file {}", self.path.display()))?;
        match self.format {
            MetricsFormat::Csv => {
                if fresh {
                    writeln!(file, "{CSV_HEADER}").context("Failed to write metrics header")?;
                }
                writeln!(
                    file,
                    "{},{},{},{},{:.1},{:.1}",
                    Local::now().format("%Y-%m-%dT%H:%M:%S"),
                    snapshot.status.replace(',', ";"),
                    snapshot.messages,
                    snapshot.attempts,
                    snapshot.cpu_percent,
                    snapshot.memory_mb
                )
                .context("Failed to write metrics row")?;
            }
            MetricsFormat::JsonLines => {
                let line = json!({
                    "timestamp": Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
                    "status": snapshot.status,
                    "messages": snapshot.messages,
                    "attempts": snapshot.attempts,
                    "cpu_percent": snapshot.cpu_percent,
                    "memory_mb": snapshot.memory_mb,
                });
                writeln!(file, "{line}").context("Failed to write metrics line")?;
            }
        }
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let Some(max) = self.max_bytes else {
            return Ok(());
        };
        let Ok(meta) = fs::metadata(&self.path) else {
            return Ok(());
        };
        if meta.len() <= max {
            return Ok(());
        }
        let oldest = self.generation_path(self.rotate_count);
        if oldest.exists() {
            fs::remove_file(&oldest)
                .with_context(|| format!("Failed to drop {}", oldest.display()))?;
        }
        for generation in (1..self.rotate_count).rev() {
            let from = self.generation_path(generation);
            if from.exists() {
                let to = self.generation_path(generation + 1);
                fs::rename(&from, &to)
                    .with_context(|| format!("Failed to rotate {}", from.display()))?;
            }
        }
        fs::rename(&self.path, self.generation_path(1))
            .with_context(|| format!("Failed to rotate {}", self.path.display()))?;
        Ok(())
    }

    fn generation_path(&self, generation: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{generation}"));
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot(status: &str) -> MetricsSnapshot {
        MetricsSnapshot {
            status: status.to_string(),
            messages: 12,
            attempts: 1,
            cpu_percent: 3.5,
            memory_mb: 48.2,
        }
    }

    fn sink(dir: &Path, max_file_size_mb: Option<f64>, rotate_count: usize) -> MetricsSink {
        let config = WatchdogConfig {
            metrics_file: Some("metrics.csv".to_string()),
            max_file_size_mb,
            rotate_count,
            ..WatchdogConfig::default()
        };
        MetricsSink::from_config(&config, dir).unwrap()
    }

    #[test]
    fn test_csv_header_written_once() {
        let dir = tempdir().unwrap();
        let sink = sink(dir.path(), None, 3);
        sink.record(&snapshot("running")).unwrap();
        sink.record(&snapshot("running")).unwrap();

        let raw = fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains(",running,12,1,3.5,48.2"));
    }

    #[test]
    fn test_rotation_shifts_generations() {
        let dir = tempdir().unwrap();
        // A few bytes force a rotation on every record after the first.
        let sink = sink(dir.path(), Some(0.00001), 2);
        sink.record(&snapshot("first")).unwrap();
        sink.record(&snapshot("second")).unwrap();
        sink.record(&snapshot("third")).unwrap();

        let base = fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        let gen1 = fs::read_to_string(dir.path().join("metrics.csv.1")).unwrap();
        let gen2 = fs::read_to_string(dir.path().join("metrics.csv.2")).unwrap();
        assert!(base.contains("third"));
        assert!(base.starts_with(CSV_HEADER), "rotated file must restart with header");
        assert!(gen1.contains("second"));
        assert!(gen2.contains("first"));
    }

    #[test]
    fn test_rotation_drops_oldest_generation() {
        let dir = tempdir().unwrap();
        let sink = sink(dir.path(), Some(0.00001), 2);
        for status in ["a", "b", "c", "d"] {
            sink.record(&snapshot(status)).unwrap();
        }
        assert!(dir.path().join("metrics.csv").exists());
        assert!(dir.path().join("metrics.csv.1").exists());
        assert!(dir.path().join("metrics.csv.2").exists());
        assert!(!dir.path().join("metrics.csv.3").exists());
        // "a" fell off the end.
        let gen2 = fs::read_to_string(dir.path().join("metrics.csv.2")).unwrap();
        assert!(gen2.contains("b"));
    }

    #[test]
    fn test_json_lines_format() {
        let dir = tempdir().unwrap();
        let config = WatchdogConfig {
            metrics_file: Some("metrics.jsonl".to_string()),
            metrics_format: "json".to_string(),
            ..WatchdogConfig::default()
        };
        let sink = MetricsSink::from_config(&config, dir.path()).unwrap();
        sink.record(&snapshot("running")).unwrap();

        let raw = fs::read_to_string(dir.path().join("metrics.jsonl")).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["messages"], 12);
    }

    #[test]
    fn test_disabled_without_metrics_file() {
        let config = WatchdogConfig::default();
        assert!(MetricsSink::from_config(&config, Path::new("/tmp")).is_none());
    }
}
