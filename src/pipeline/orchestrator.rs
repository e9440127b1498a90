//! Iteration loop driving capture, recognition, parsing and scrolling.
//!
//! Each iteration runs capture -> detect -> recognize -> parse -> dedup ->
//! accumulate, then asks the scroll controller to advance. The loop is
//! single-threaded; the heartbeat thread only observes it through the
//! shared progress state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use rand::Rng;

use crate::automation::scroll::{
    pointer_in_corner, Pacer, ScrollController, ScrollOutcome, ScrollStatistics, FAILSAFE_MARGIN,
};
use crate::capture::{CaptureEngine, FrameSource, WindowControl};
use crate::config::AppConfig;
use crate::error::ExtractError;
use crate::models::{Message, ScrollDirection};
use crate::ocr::{OcrGateway, RecognitionEngine};
use crate::parser::{MessageParser, ParseOptions};
use crate::pipeline::dedup::DeduplicationIndex;
use crate::pipeline::filters::MessageFilter;
use crate::pipeline::progress::ProgressState;
use crate::pipeline::storage::export_messages;

/// Why the scan loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EdgeReached,
    Stalled,
    Cancelled,
    MaxIterations,
    TargetCount,
    TargetContent,
    NoNewMessages,
    Failed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::EdgeReached => "edge reached",
            StopReason::Stalled => "scroll stalled",
            StopReason::Cancelled => "cancelled",
            StopReason::MaxIterations => "max iterations",
            StopReason::TargetCount => "message target reached",
            StopReason::TargetContent => "target content found",
            StopReason::NoNewMessages => "no new messages",
            StopReason::Failed => "failed",
        };
        write!(f, "{text}")
    }
}

/// Final result of a scan.
pub struct RunSummary {
    pub messages: Vec<Message>,
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub scroll_stats: ScrollStatistics,
    pub exported: Vec<PathBuf>,
}

pub struct PipelineOrchestrator {
    config: AppConfig,
    window: Box<dyn WindowControl>,
    capture: CaptureEngine,
    gateway: OcrGateway,
    parser: MessageParser,
    controller: ScrollController,
    index: DeduplicationIndex,
    filter: MessageFilter,
    progress: Arc<ProgressState>,
    cancel: Arc<AtomicBool>,
    output_dir: PathBuf,
    dry_run: bool,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        window: Box<dyn WindowControl>,
        source: Box<dyn FrameSource>,
        engine: Box<dyn RecognitionEngine>,
        filter: MessageFilter,
        output_dir: PathBuf,
        dry_run: bool,
    ) -> Result<Self> {
        let capture = CaptureEngine::new(source, config.recognition.frame_history);
        let gateway = OcrGateway::new(engine, &config.recognition);
        let parser = MessageParser::new(ParseOptions::default(), &[])?;
        let controller = ScrollController::new(config.scroll.clone(), config.window.clone());
        let mut index = DeduplicationIndex::load(&output_dir, config.output.aggressive_dedup);
        if dry_run {
            index.set_persist(false);
        }
        Ok(Self {
            config,
            window,
            capture,
            gateway,
            parser,
            controller,
            index,
            filter,
            progress: Arc::new(ProgressState::default()),
            cancel: Arc::new(AtomicBool::new(false)),
            output_dir,
            dry_run,
        })
    }

    /// Shared stop flag; setting it ends the run at the next boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn progress(&self) -> Arc<ProgressState> {
        Arc::clone(&self.progress)
    }

    /// Clears the persisted dedup index.
    pub fn clear_dedup_index(&mut self) -> Result<()> {
        self.index.clear()
    }

    pub fn run<R: Rng>(&mut self, rng: &mut R, pacer: &mut dyn Pacer) -> Result<RunSummary> {
        let direction = self.config.scroll.direction;
        let mut accumulated: Vec<Message> = Vec::new();
        let mut consecutive_empty = 0u32;
        let mut iterations = 0u32;
        let mut stop_reason = StopReason::MaxIterations;
        // Set on an unrecoverable failure. The loop still falls through to
        // the export step so everything deduplicated so far is written out;
        // the index has already recorded those keys, so dropping them here
        // would lose them for good.
        let mut fatal: Option<anyhow::Error> = None;

        self.progress.set_status("starting");
        self.controller.bind(self.window.as_mut())?;

        if self.config.pipeline.scroll_to_top {
            self.progress.set_status("positioning");
            let reached = self
                .controller
                .scroll_to_top(self.window.as_mut(), &mut self.capture, pacer)?;
            if !reached {
                crate::log("Could not confirm the top of the history, scanning from here");
            }
        }

        while iterations < self.config.pipeline.max_iterations {
            if self.cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }
            iterations += 1;
            self.progress.set_status("capturing");

            let batch = match self.extract_with_retry(pacer) {
                Ok(batch) => batch,
                Err(err) => {
                    let recoverable = err
                        .downcast_ref::<ExtractError>()
                        .map(ExtractError::is_recoverable)
                        .unwrap_or(false);
                    if !recoverable {
                        crate::log(&format!("Stopping on unrecoverable failure: {err:#}"));
                        self.progress.set_last_error(&format!("{err:#}"));
                        fatal = Some(err);
                        stop_reason = StopReason::Failed;
                        break;
                    }
                    crate::log(&format!("Iteration {iterations} produced nothing: {err:#}"));
                    self.progress.set_last_error(&format!("{err:#}"));
                    Vec::new()
                }
            };

            let matched_target = self
                .config
                .pipeline
                .target_content
                .as_ref()
                .map(|target| {
                    batch
                        .iter()
                        .any(|m| m.content.contains(target) || m.raw_text.contains(target))
                })
                .unwrap_or(false);

            let fresh = if self.config.output.dedup_enabled {
                self.index.filter_new(&batch)
            } else {
                batch.clone()
            };
            let hit_rate = if batch.is_empty() {
                0.0
            } else {
                fresh.len() as f64 / batch.len() as f64
            };

            if fresh.is_empty() {
                consecutive_empty += 1;
                crate::log(&format!(
                    "Iteration {iterations}: no new messages ({consecutive_empty} in a row)"
                ));
                if consecutive_empty >= self.config.pipeline.consecutive_empty_limit {
                    stop_reason = StopReason::NoNewMessages;
                    break;
                }
            } else {
                consecutive_empty = 0;
                crate::log(&format!(
                    "Iteration {iterations}: {} new messages ({} total)",
                    fresh.len(),
                    accumulated.len() + fresh.len()
                ));
                // Upward scans read the history newest-first, so each batch
                // is reversed to keep the accumulated list in that order.
                match direction {
                    ScrollDirection::Up => accumulated.extend(fresh.into_iter().rev()),
                    ScrollDirection::Down => accumulated.extend(fresh),
                }
                self.progress.set_messages(accumulated.len());
            }

            if matched_target {
                stop_reason = StopReason::TargetContent;
                break;
            }
            if accumulated.len() >= self.config.pipeline.max_messages {
                stop_reason = StopReason::TargetCount;
                break;
            }

            self.adapt_scroll(hit_rate);

            self.progress.set_status("scrolling");
            match self
                .controller
                .advance(self.window.as_mut(), &mut self.capture, rng, pacer)
            {
                Ok(ScrollOutcome::Advanced) => {}
                Ok(ScrollOutcome::AtEdge) => {
                    if self.config.pipeline.stop_at_edges {
                        stop_reason = StopReason::EdgeReached;
                        break;
                    }
                }
                Ok(ScrollOutcome::Stalled) => {
                    stop_reason = StopReason::Stalled;
                    break;
                }
                Err(err) => {
                    crate::log(&format!("Stopping on scroll failure: {err:#}"));
                    self.progress.set_last_error(&format!("{err:#}"));
                    fatal = Some(err);
                    stop_reason = StopReason::Failed;
                    break;
                }
            }
            if self.cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }
        }

        self.progress.set_status("finishing");
        self.parser
            .fill_message_times(&mut accumulated, direction, Local::now());
        let filtered = self.filter.apply(accumulated);
        self.progress.set_messages(filtered.len());

        let exported = if self.dry_run || filtered.is_empty() {
            Vec::new()
        } else {
            std::fs::create_dir_all(&self.output_dir).with_context(|| {
                format!(
                    "Failed to create output directory {}",
                    self.output_dir.display()
                )
            })?;
            export_messages(&filtered, &self.config.output, &self.output_dir)?
        };

        if let Some(err) = fatal {
            if !exported.is_empty() {
                crate::log(&format!(
                    "Run ended with {stop_reason}; kept {} partial export file(s)",
                    exported.len()
                ));
            }
            return Err(err);
        }

        Ok(RunSummary {
            messages: filtered,
            iterations,
            stop_reason,
            scroll_stats: self.controller.statistics(),
            exported,
        })
    }

    /// One capture attempt, retried on recoverable failures and empty
    /// results with a fixed delay between attempts.
    fn extract_with_retry(&mut self, pacer: &mut dyn Pacer) -> Result<Vec<Message>> {
        let attempts = self.config.pipeline.retry_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            self.progress.add_attempt();
            match self.extract_once() {
                Ok(batch) => return Ok(batch),
                Err(err) => {
                    let recoverable = err
                        .downcast_ref::<ExtractError>()
                        .map(ExtractError::is_recoverable)
                        .unwrap_or(false);
                    if !recoverable {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
            if attempt < attempts {
                pacer.sleep(self.config.pipeline.retry_delay_secs);
            }
        }
        Err(last_err.unwrap_or_else(|| ExtractError::EmptyResult.into()))
    }

    fn extract_once(&mut self) -> Result<Vec<Message>> {
        let chat_area = self
            .controller
            .chat_area()
            .ok_or_else(|| ExtractError::WindowNotFound("no bound session".to_string()))?;
        let frame = self.capture.capture(&chat_area)?;
        let regions = self.gateway.extract(&frame.image)?;
        if regions.is_empty() {
            return Err(ExtractError::EmptyResult.into());
        }
        let mut batch = self.parser.parse(&regions);
        if batch.is_empty() {
            return Err(ExtractError::EmptyResult.into());
        }
        // A frame reads top to bottom, oldest first, so separator times
        // carry forward here regardless of scan direction. Doing this
        // before dedup keeps stable keys stable across re-reads.
        self.parser
            .fill_message_times(&mut batch, ScrollDirection::Down, Local::now());
        Ok(batch)
    }

    fn adapt_scroll(&mut self, hit_rate: f64) {
        if !self.config.pipeline.adaptive_speed {
            return;
        }
        if hit_rate < 0.3 {
            // Mostly seen content: move faster.
            let speed = (self.controller.speed() + 1).min(10);
            let delay = (self.controller.delay_secs() - 0.1).max(0.2);
            self.controller.set_speed(speed);
            self.controller.set_delay_secs(delay);
        } else if hit_rate > 0.7 {
            // Dense new content: slow down so nothing scrolls past unread.
            let speed = self.controller.speed().saturating_sub(1).max(1);
            let delay = (self.controller.delay_secs() + 0.1).min(2.0);
            self.controller.set_speed(speed);
            self.controller.set_delay_secs(delay);
        }
    }

    fn cancelled(&mut self) -> bool {
        if self.cancel.load(Ordering::SeqCst) {
            return true;
        }
        match pointer_in_corner(self.window.as_mut(), FAILSAFE_MARGIN) {
            Ok(true) => {
                crate::log("Pointer moved to a screen corner, stopping");
                self.cancel.store(true, Ordering::SeqCst);
                true
            }
            // A failed pointer query never stops the run.
            Ok(false) | Err(_) => false,
        }
    }
}
