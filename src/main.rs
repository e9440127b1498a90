//! WeChat history extractor
//!
//! Scrolls a live WeChat window, captures the chat area, recognizes the
//! visible text and assembles it into deduplicated message records.

mod automation;
mod capture;
mod config;
mod error;
mod models;
mod ocr;
mod parser;
mod paths;
mod pipeline;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;

use crate::automation::scroll::SystemPacer;
use crate::capture::NativeBackend;
use crate::config::{load_config, AppConfig};
use crate::models::{Rectangle, ScrollDirection};
use crate::ocr::TesseractEngine;
use crate::pipeline::orchestrator::PipelineOrchestrator;
use crate::pipeline::progress::Heartbeat;
use crate::pipeline::{MessageFilter, MetricsSink};

const LOG_FILE: &str = "wechat_extractor.log";

/// Logs a message to both console and log file with timestamp.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    print!("{}", line);
    let log_path = paths::get_logs_dir().join(LOG_FILE);
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(line.as_bytes());
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Extract chat history from a live WeChat window")]
struct Args {
    /// Configuration file (default: config.json next to the executable)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Extra window title substring tried before the built-in keywords
    #[arg(short = 'w', long)]
    window_title: Option<String>,

    /// Explicit chat area "x,y,w,h" in screen coordinates; skips window
    /// location entirely
    #[arg(long, value_parser = parse_chat_area)]
    chat_area: Option<Rectangle>,

    /// Scroll direction: up (into history) or down
    #[arg(short = 'd', long)]
    direction: Option<ScrollDirection>,

    /// Maximum scroll iterations
    #[arg(short = 'n', long)]
    max_iterations: Option<u32>,

    /// Stop once the recognized text contains this string
    #[arg(short = 't', long)]
    target_content: Option<String>,

    /// Output directory override
    #[arg(short = 'o', long)]
    output_dir: Option<String>,

    /// Export format: json, csv, txt or md
    #[arg(short = 'f', long)]
    format: Option<String>,

    /// Keep only messages whose sender contains this substring
    #[arg(long)]
    sender: Option<String>,

    /// Keep only messages whose content contains this substring
    #[arg(long)]
    contains: Option<String>,

    /// Drop messages below this confidence (0.0-1.0)
    #[arg(long)]
    min_confidence: Option<f32>,

    /// Forget all previously seen messages before scanning
    #[arg(long)]
    clear_index: bool,

    /// Capture and parse the current view once, without scrolling
    #[arg(long)]
    once: bool,

    /// Run the pipeline without writing any output or index files
    #[arg(long)]
    dry_run: bool,
}

/// Parses an "x,y,w,h" chat area argument.
fn parse_chat_area(raw: &str) -> Result<Rectangle, String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected x,y,w,h (got \"{}\")", raw));
    }
    let x = parts[0].parse::<i32>().map_err(|e| format!("x: {}", e))?;
    let y = parts[1].parse::<i32>().map_err(|e| format!("y: {}", e))?;
    let w = parts[2].parse::<u32>().map_err(|e| format!("w: {}", e))?;
    let h = parts[3].parse::<u32>().map_err(|e| format!("h: {}", e))?;
    if w == 0 || h == 0 {
        return Err("chat area must not be empty".to_string());
    }
    Ok(Rectangle::new(x, y, w, h))
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(title) = &args.window_title {
        config.window.extra_title = Some(title.clone());
    }
    if let Some(area) = args.chat_area {
        config.window.chat_area_override = Some(area);
    }
    if let Some(direction) = args.direction {
        config.scroll.direction = direction;
    }
    if let Some(max) = args.max_iterations {
        config.pipeline.max_iterations = max;
    }
    if let Some(target) = &args.target_content {
        config.pipeline.target_content = Some(target.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.output.directory = dir.clone();
    }
    if let Some(format) = &args.format {
        config.output.format = format.clone();
    }
    if args.once {
        // One pass over the current view: no repositioning, one capture.
        config.pipeline.max_iterations = 1;
        config.pipeline.scroll_to_top = false;
    }
}

fn message_filter(args: &Args) -> MessageFilter {
    MessageFilter {
        sender_contains: args.sender.clone(),
        content_contains: args.contains.clone(),
        min_confidence: args.min_confidence,
        ..MessageFilter::default()
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up panic hook to log panics
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = if let Some(loc) = panic_info.location() {
            format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column())
        } else {
            String::new()
        };
        // Try to log even if paths module isn't initialized
        let log_msg = format!("[PANIC]{} {}\n", location, msg);
        eprintln!("{}", log_msg);
        if let Ok(exe_dir) = std::env::current_exe().map(|p| p.parent().unwrap().to_path_buf()) {
            let log_path = exe_dir.join("logs").join(LOG_FILE);
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
            {
                let _ = file.write_all(log_msg.as_bytes());
            }
        }
    }));

    let mut config = load_config(args.config.as_deref());
    apply_overrides(&mut config, &args);
    config.validate()?;

    let output_dir = paths::resolve_output_dir(&config.output.directory);
    paths::ensure_directories(&output_dir)?;
    log(&format!("Output directory: {}", output_dir.display()));

    // No engine, no extraction: this is the one startup failure that ends
    // the run before it begins.
    let engine = TesseractEngine::new(&config.recognition)?;

    let backend = NativeBackend::new();
    let filter = message_filter(&args);
    let watchdog = config.watchdog.clone();

    let mut orchestrator = PipelineOrchestrator::new(
        config,
        Box::new(backend),
        Box::new(backend),
        Box::new(engine),
        filter,
        output_dir.clone(),
        args.dry_run,
    )?;

    if args.clear_index {
        orchestrator.clear_dedup_index()?;
        log("Dedup index cleared; previously seen messages will be re-emitted");
    }

    let sink = MetricsSink::from_config(&watchdog, &output_dir);
    let heartbeat = Heartbeat::start(&watchdog, orchestrator.progress(), sink);

    log("Starting scan (move the pointer to a screen corner to stop)");
    let mut rng = rand::thread_rng();
    let mut pacer = SystemPacer::default();
    let summary = orchestrator.run(&mut rng, &mut pacer)?;
    heartbeat.stop();

    log(&format!(
        "Scan finished: {} ({} iterations, {} messages)",
        summary.stop_reason,
        summary.iterations,
        summary.messages.len()
    ));
    let stats = summary.scroll_stats;
    log(&format!(
        "Scrolls: {} ({} notches, {} rate-limit pauses, {} edge confirmations, {} stall recoveries)",
        stats.total_scrolls,
        stats.total_notches,
        stats.rate_limit_pauses,
        stats.edge_confirmations,
        stats.stall_recoveries
    ));
    for path in &summary.exported {
        log(&format!("Wrote {}", path.display()));
    }
    if args.dry_run {
        log("Dry run: nothing was written");
    }

    if summary.messages.is_empty() && !args.dry_run {
        return Err(anyhow!("no messages were extracted"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_area() {
        assert_eq!(
            parse_chat_area("10, 20, 800, 600").unwrap(),
            Rectangle::new(10, 20, 800, 600)
        );
        assert!(parse_chat_area("10,20,800").is_err());
        assert!(parse_chat_area("10,20,0,600").is_err());
        assert!(parse_chat_area("a,b,c,d").is_err());
    }

    fn bare_args() -> Args {
        Args {
            config: None,
            window_title: None,
            chat_area: None,
            direction: None,
            max_iterations: None,
            target_content: None,
            output_dir: None,
            format: None,
            sender: None,
            contains: None,
            min_confidence: None,
            clear_index: false,
            once: false,
            dry_run: false,
        }
    }

    #[test]
    fn test_overrides_apply() {
        let args = Args {
            window_title: Some("企业微信".to_string()),
            chat_area: Some(Rectangle::new(1, 2, 300, 400)),
            direction: Some(ScrollDirection::Down),
            max_iterations: Some(5),
            target_content: Some("合同".to_string()),
            output_dir: Some("out".to_string()),
            format: Some("csv".to_string()),
            ..bare_args()
        };
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.window.extra_title.as_deref(), Some("企业微信"));
        assert_eq!(
            config.window.chat_area_override,
            Some(Rectangle::new(1, 2, 300, 400))
        );
        assert_eq!(config.scroll.direction, ScrollDirection::Down);
        assert_eq!(config.pipeline.max_iterations, 5);
        assert_eq!(config.output.format, "csv");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_once_limits_iterations() {
        let args = Args {
            once: true,
            dry_run: true,
            ..bare_args()
        };
        let mut config = AppConfig::default();
        config.pipeline.scroll_to_top = true;
        apply_overrides(&mut config, &args);
        assert_eq!(config.pipeline.max_iterations, 1);
        assert!(!config.pipeline.scroll_to_top);
    }
}
