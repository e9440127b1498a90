//! Configuration for the extraction pipeline.
//!
//! Loads settings from config.json next to the executable (or an explicit
//! path). Every field has a default so partial config files work. The loaded
//! struct is passed by reference through the pipeline; there is no global
//! config instance.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ExtractError;
use crate::models::{Rectangle, ScrollDirection};

/// Scroll strategy variant selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollStrategy {
    /// Constant increment derived from scroll speed.
    Fixed,
    /// Randomized distances with inertia and occasional reading pauses.
    Progressive,
}

impl std::str::FromStr for ScrollStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(ScrollStrategy::Fixed),
            "progressive" => Ok(ScrollStrategy::Progressive),
            other => Err(format!("unknown scroll strategy: {}", other)),
        }
    }
}

/// Window location and chat-area estimation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Title substrings tried in order when locating the chat window.
    #[serde(default = "default_title_keywords")]
    pub title_keywords: Vec<String>,
    /// Extra title substring tried before the built-in keywords.
    #[serde(default)]
    pub extra_title: Option<String>,
    /// Explicit chat area in screen coordinates. Bypasses window location.
    #[serde(default)]
    pub chat_area_override: Option<Rectangle>,
    #[serde(default = "default_title_bar_height")]
    pub title_bar_height: u32,
    #[serde(default = "default_sidebar_width")]
    pub sidebar_width: u32,
    #[serde(default = "default_input_area_height")]
    pub input_area_height: u32,
    #[serde(default = "default_margin")]
    pub margin: u32,
}

fn default_title_keywords() -> Vec<String> {
    vec!["微信".to_string(), "WeChat".to_string(), "wechat".to_string()]
}

fn default_title_bar_height() -> u32 {
    30
}

fn default_sidebar_width() -> u32 {
    250
}

fn default_input_area_height() -> u32 {
    100
}

fn default_margin() -> u32 {
    10
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title_keywords: default_title_keywords(),
            extra_title: None,
            chat_area_override: None,
            title_bar_height: default_title_bar_height(),
            sidebar_width: default_sidebar_width(),
            input_area_height: default_input_area_height(),
            margin: default_margin(),
        }
    }
}

/// Scroll behavior, edge detection and rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    #[serde(default = "default_strategy")]
    pub strategy: ScrollStrategy,
    /// Base scroll speed (1-10).
    #[serde(default = "default_scroll_speed")]
    pub speed: u32,
    /// Delay after each scroll increment (0.1-10.0 seconds).
    #[serde(default = "default_scroll_delay")]
    pub delay_secs: f64,
    #[serde(default = "default_direction")]
    pub direction: ScrollDirection,
    /// Progressive strategy: per-increment distance range in pixels.
    #[serde(default = "default_distance_min")]
    pub distance_min: u32,
    #[serde(default = "default_distance_max")]
    pub distance_max: u32,
    /// Progressive strategy: randomized pause range between increments.
    #[serde(default = "default_interval_min")]
    pub interval_min_secs: f64,
    #[serde(default = "default_interval_max")]
    pub interval_max_secs: f64,
    /// Progressive strategy: smooth distances toward the recent average.
    #[serde(default = "default_inertia")]
    pub inertia: bool,
    /// Progressive strategy: probability of a longer reading pause.
    #[serde(default = "default_micro_pause_probability")]
    pub micro_pause_probability: f64,
    /// Hard cap on increments per one-minute window. None disables limiting.
    #[serde(default)]
    pub max_per_minute: Option<u32>,
    /// Fraction by which the per-minute budget is randomly reduced (0.0-0.9).
    #[serde(default = "default_spm_jitter")]
    pub spm_jitter: f64,
    /// Per-minute budget drawn uniformly from this range. Wins over jitter.
    #[serde(default)]
    pub spm_range: Option<(u32, u32)>,
    /// Similarity at or above this counts as an edge hit (0.92-0.98).
    #[serde(default = "default_edge_similarity")]
    pub edge_similarity_threshold: f64,
    /// Stricter similarity required by the confirmation scroll.
    #[serde(default = "default_edge_confirm")]
    pub edge_confirm_threshold: f64,
    /// Consecutive edge hits required before confirmation is attempted.
    #[serde(default = "default_edge_consecutive")]
    pub edge_consecutive_required: u32,
    /// Seconds without a progressing frame before a stall is suspected.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: f64,
    /// Window re-acquisition attempts before reporting a stall.
    #[serde(default = "default_relocate_attempts")]
    pub relocate_attempts: u32,
}

fn default_strategy() -> ScrollStrategy {
    ScrollStrategy::Fixed
}

fn default_scroll_speed() -> u32 {
    3
}

fn default_scroll_delay() -> f64 {
    0.5
}

fn default_direction() -> ScrollDirection {
    ScrollDirection::Up
}

fn default_distance_min() -> u32 {
    200
}

fn default_distance_max() -> u32 {
    300
}

fn default_interval_min() -> f64 {
    0.3
}

fn default_interval_max() -> f64 {
    0.5
}

fn default_inertia() -> bool {
    true
}

fn default_micro_pause_probability() -> f64 {
    0.12
}

fn default_spm_jitter() -> f64 {
    0.3
}

fn default_edge_similarity() -> f64 {
    0.95
}

fn default_edge_confirm() -> f64 {
    0.97
}

fn default_edge_consecutive() -> u32 {
    2
}

fn default_stale_after() -> f64 {
    15.0
}

fn default_relocate_attempts() -> u32 {
    3
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            speed: default_scroll_speed(),
            delay_secs: default_scroll_delay(),
            direction: default_direction(),
            distance_min: default_distance_min(),
            distance_max: default_distance_max(),
            interval_min_secs: default_interval_min(),
            interval_max_secs: default_interval_max(),
            inertia: default_inertia(),
            micro_pause_probability: default_micro_pause_probability(),
            max_per_minute: None,
            spm_jitter: default_spm_jitter(),
            spm_range: None,
            edge_similarity_threshold: default_edge_similarity(),
            edge_confirm_threshold: default_edge_confirm(),
            edge_consecutive_required: default_edge_consecutive(),
            stale_after_secs: default_stale_after(),
            relocate_attempts: default_relocate_attempts(),
        }
    }
}

/// Recognition engine, region detection and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Tesseract language. Legacy aliases like "ch" are mapped by the engine.
    #[serde(default = "default_language")]
    pub language: String,
    /// Explicit tesseract executable. Falls back to the per-user install
    /// directory, then PATH.
    #[serde(default)]
    pub engine_path: Option<PathBuf>,
    #[serde(default)]
    pub tessdata_path: Option<PathBuf>,
    /// Regions recognized below this confidence are dropped (0.0-1.0).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Largest regions (by area) recognized per frame.
    #[serde(default = "default_max_regions")]
    pub max_regions: usize,
    /// Minimum candidate region area in square pixels.
    #[serde(default = "default_min_region_area")]
    pub min_region_area: u32,
    /// Maximum candidate area as a fraction of the frame.
    #[serde(default = "default_max_area_ratio")]
    pub max_area_ratio: f32,
    #[serde(default = "default_region_cache_size")]
    pub region_cache_size: usize,
    #[serde(default = "default_frame_cache_size")]
    pub frame_cache_size: usize,
    /// Captured frames larger than this are downsampled before use.
    #[serde(default = "default_downsample_max_side")]
    pub downsample_max_side: u32,
    /// Frames retained for similarity comparison.
    #[serde(default = "default_frame_history")]
    pub frame_history: usize,
}

fn default_language() -> String {
    "chi_sim".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.7
}

fn default_max_regions() -> usize {
    25
}

fn default_min_region_area() -> u32 {
    80
}

fn default_max_area_ratio() -> f32 {
    0.5
}

fn default_region_cache_size() -> usize {
    256
}

fn default_frame_cache_size() -> usize {
    16
}

fn default_downsample_max_side() -> u32 {
    1400
}

fn default_frame_history() -> usize {
    3
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            engine_path: None,
            tessdata_path: None,
            confidence_threshold: default_confidence_threshold(),
            max_regions: default_max_regions(),
            min_region_area: default_min_region_area(),
            max_area_ratio: default_max_area_ratio(),
            region_cache_size: default_region_cache_size(),
            frame_cache_size: default_frame_cache_size(),
            downsample_max_side: default_downsample_max_side(),
            frame_history: default_frame_history(),
        }
    }
}

/// Orchestrator loop bounds and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Stop once this many messages have accumulated.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Stop after this many consecutive iterations with zero new messages.
    #[serde(default = "default_consecutive_empty_limit")]
    pub consecutive_empty_limit: u32,
    /// Retry attempts for a single capture (1-10).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
    /// Stop once the recognized text of a frame contains this string.
    #[serde(default)]
    pub target_content: Option<String>,
    #[serde(default = "default_stop_at_edges")]
    pub stop_at_edges: bool,
    /// Burst-scroll to the top of the history before the first iteration.
    #[serde(default)]
    pub scroll_to_top: bool,
    /// Adjust scroll speed and delay to the new-message hit rate.
    #[serde(default = "default_adaptive_speed")]
    pub adaptive_speed: bool,
}

fn default_max_iterations() -> u32 {
    100
}

fn default_max_messages() -> usize {
    1000
}

fn default_consecutive_empty_limit() -> u32 {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    0.5
}

fn default_stop_at_edges() -> bool {
    true
}

fn default_adaptive_speed() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_messages: default_max_messages(),
            consecutive_empty_limit: default_consecutive_empty_limit(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay(),
            target_content: None,
            stop_at_edges: default_stop_at_edges(),
            scroll_to_top: false,
            adaptive_speed: default_adaptive_speed(),
        }
    }
}

/// Export formats, dedup and output location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory. Relative paths are anchored at the executable.
    #[serde(default = "default_output_directory")]
    pub directory: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Primary export format: json, csv, txt or md.
    #[serde(default = "default_format")]
    pub format: String,
    /// Additional formats written from the same deduplicated batch.
    #[serde(default)]
    pub formats: Option<Vec<String>>,
    /// Top-level fields dropped from JSON/CSV output.
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    /// Drop time-separator messages before writing.
    #[serde(default)]
    pub exclude_time_only: bool,
    /// Append to an existing file instead of writing a timestamped one.
    #[serde(default)]
    pub append: bool,
    #[serde(default = "default_dedup_enabled")]
    pub dedup_enabled: bool,
    /// Also collapse on lowercased sender+content, ignoring timestamps.
    #[serde(default)]
    pub aggressive_dedup: bool,
}

fn default_output_directory() -> String {
    "output".to_string()
}

fn default_prefix() -> String {
    "extraction".to_string()
}

fn default_format() -> String {
    "json".to_string()
}

fn default_dedup_enabled() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            prefix: default_prefix(),
            format: default_format(),
            formats: None,
            exclude_fields: Vec::new(),
            exclude_time_only: false,
            append: false,
            dedup_enabled: default_dedup_enabled(),
            aggressive_dedup: false,
        }
    }
}

/// Background heartbeat and metrics sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Heartbeat sampling interval. Values below 1s are raised to 1s.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: f64,
    /// CPU percentage at which a warning is logged. None disables the check.
    #[serde(default)]
    pub cpu_threshold: Option<f32>,
    /// Resident memory in MB at which a warning is logged.
    #[serde(default)]
    pub mem_threshold_mb: Option<f64>,
    /// Metrics output file. None disables the sink.
    #[serde(default)]
    pub metrics_file: Option<String>,
    /// Metrics format: csv or json (one object per line).
    #[serde(default = "default_metrics_format")]
    pub metrics_format: String,
    /// Rotate the metrics file once it exceeds this size.
    #[serde(default)]
    pub max_file_size_mb: Option<f64>,
    /// Historical generations kept during rotation.
    #[serde(default = "default_rotate_count")]
    pub rotate_count: usize,
}

fn default_heartbeat_secs() -> f64 {
    5.0
}

fn default_metrics_format() -> String {
    "csv".to_string()
}

fn default_rotate_count() -> usize {
    3
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            cpu_threshold: None,
            mem_threshold_mb: None,
            metrics_file: None,
            metrics_format: default_metrics_format(),
            max_file_size_mb: None,
            rotate_count: default_rotate_count(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

const EXPORT_FORMATS: [&str; 4] = ["json", "csv", "txt", "md"];

impl AppConfig {
    /// Validates value ranges. All violations are reported in one error,
    /// joined with "; ".
    pub fn validate(&self) -> Result<(), ExtractError> {
        let mut errors: Vec<String> = Vec::new();

        if !(1..=10).contains(&self.scroll.speed) {
            errors.push(format!(
                "scroll.speed must be 1-10 (got {})",
                self.scroll.speed
            ));
        }
        if !(0.1..=10.0).contains(&self.scroll.delay_secs) {
            errors.push(format!(
                "scroll.delay_secs must be 0.1-10.0 (got {})",
                self.scroll.delay_secs
            ));
        }
        if self.scroll.distance_min == 0 || self.scroll.distance_min > self.scroll.distance_max {
            errors.push(format!(
                "scroll distance range invalid ({}-{})",
                self.scroll.distance_min, self.scroll.distance_max
            ));
        }
        if self.scroll.interval_min_secs < 0.0
            || self.scroll.interval_min_secs > self.scroll.interval_max_secs
        {
            errors.push(format!(
                "scroll interval range invalid ({}-{})",
                self.scroll.interval_min_secs, self.scroll.interval_max_secs
            ));
        }
        if !(0.92..=0.98).contains(&self.scroll.edge_similarity_threshold) {
            errors.push(format!(
                "scroll.edge_similarity_threshold must be 0.92-0.98 (got {})",
                self.scroll.edge_similarity_threshold
            ));
        }
        if self.scroll.edge_confirm_threshold < self.scroll.edge_similarity_threshold
            || self.scroll.edge_confirm_threshold > 1.0
        {
            errors.push(format!(
                "scroll.edge_confirm_threshold must be between the edge threshold and 1.0 (got {})",
                self.scroll.edge_confirm_threshold
            ));
        }
        if let Some((min, max)) = self.scroll.spm_range {
            if min == 0 || min > max {
                errors.push(format!("scroll.spm_range invalid ({}-{})", min, max));
            }
        }
        if !(0.0..=0.9).contains(&self.scroll.spm_jitter) {
            errors.push(format!(
                "scroll.spm_jitter must be 0.0-0.9 (got {})",
                self.scroll.spm_jitter
            ));
        }

        if !(0.0..=1.0).contains(&self.recognition.confidence_threshold) {
            errors.push(format!(
                "recognition.confidence_threshold must be 0.0-1.0 (got {})",
                self.recognition.confidence_threshold
            ));
        }
        if self.recognition.frame_history == 0 {
            errors.push("recognition.frame_history must be at least 1".to_string());
        }
        if self.recognition.region_cache_size == 0 || self.recognition.frame_cache_size == 0 {
            errors.push("recognition cache sizes must be at least 1".to_string());
        }

        if !(1..=10).contains(&self.pipeline.retry_attempts) {
            errors.push(format!(
                "pipeline.retry_attempts must be 1-10 (got {})",
                self.pipeline.retry_attempts
            ));
        }

        if !EXPORT_FORMATS.contains(&self.output.format.as_str()) {
            errors.push(format!(
                "output.format must be one of json/csv/txt/md (got {})",
                self.output.format
            ));
        }
        if let Some(formats) = &self.output.formats {
            for fmt in formats {
                if !EXPORT_FORMATS.contains(&fmt.as_str()) {
                    errors.push(format!(
                        "output.formats entry must be one of json/csv/txt/md (got {})",
                        fmt
                    ));
                }
            }
        }

        if !["csv", "json"].contains(&self.watchdog.metrics_format.as_str()) {
            errors.push(format!(
                "watchdog.metrics_format must be csv or json (got {})",
                self.watchdog.metrics_format
            ));
        }
        if self.watchdog.max_file_size_mb.is_some() && self.watchdog.rotate_count == 0 {
            errors.push("watchdog.rotate_count must be at least 1 when rotation is enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ExtractError::InvalidConfig(errors.join("; ")))
        }
    }
}

/// Loads configuration from the given path, or from config.json next to the
/// executable, or returns defaults. Parse failures fall back with a log line.
pub fn load_config(explicit: Option<&Path>) -> AppConfig {
    let config_path = match explicit {
        Some(p) => p.to_path_buf(),
        None => crate::paths::get_exe_dir().join("config.json"),
    };

    crate::log(&format!("Looking for config at: {}", config_path.display()));

    if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    crate::log("Config loaded from config.json");
                    return config;
                }
                Err(e) => {
                    crate::log(&format!(
                        "Failed to parse config.json: {}. Using defaults.",
                        e
                    ));
                }
            },
            Err(e) => {
                crate::log(&format!(
                    "Failed to read config.json: {}. Using defaults.",
                    e
                ));
            }
        }
    } else {
        crate::log("config.json not found. Using default config.");
    }

    AppConfig::default()
}
