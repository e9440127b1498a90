//! Scroll driving and edge detection.
//!
//! The controller moves the chat viewport one increment at a time, watches
//! consecutive frames through the similarity metric, and reports when the
//! content has stopped changing (top or bottom of the history) or when the
//! window has gone stale and re-acquisition failed.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use rand::Rng;

use crate::automation::similarity::frame_similarity;
use crate::capture::{estimate_chat_area, title_keywords, CaptureEngine, WindowControl};
use crate::config::{ScrollConfig, ScrollStrategy, WindowConfig};
use crate::error::ExtractError;
use crate::models::{Rectangle, ScrollDirection, WindowInfo};

/// Seconds per rate-limit window.
const WINDOW_SECS: f64 = 60.0;

/// Distances kept for the inertial model.
const RECENT_DISTANCES: usize = 3;

/// Wheel notches used for the minimal edge-confirmation scroll.
const CONFIRM_NOTCHES: u32 = 3;

/// Pointer within this many pixels of a screen corner requests a stop.
pub const FAILSAFE_MARGIN: i32 = 10;

/// Result of one scroll increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    /// Content moved (or is still being evaluated).
    Advanced,
    /// Confirmed edge of the conversation history.
    AtEdge,
    /// Content frozen and window re-acquisition exhausted.
    Stalled,
}

/// Counters accumulated over a scroll session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScrollStatistics {
    pub total_scrolls: u64,
    pub total_notches: u64,
    pub rate_limit_pauses: u64,
    pub micro_pauses: u64,
    pub edge_confirmations: u32,
    pub stall_recoveries: u32,
}

/// Time source and sleeper, injectable so tests run without waiting.
pub trait Pacer {
    /// Monotonic seconds since an arbitrary origin.
    fn now(&mut self) -> f64;
    fn sleep(&mut self, seconds: f64);
}

/// Real wall-clock pacer.
pub struct SystemPacer {
    origin: Instant,
}

impl Default for SystemPacer {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Pacer for SystemPacer {
    fn now(&mut self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn sleep(&mut self, seconds: f64) {
        if seconds > 0.0 {
            thread::sleep(Duration::from_secs_f64(seconds));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    /// Content still changing or candidate not yet armed.
    Progressing,
    /// Enough consecutive similar frames; next increment confirms.
    Armed,
    /// Confirmation frame also similar at the stricter threshold.
    Confirmed,
}

/// Tracks consecutive high-similarity frames and the confirmation step.
pub struct EdgeDetector {
    threshold: f64,
    confirm_threshold: f64,
    required: u32,
    consecutive: u32,
    armed: bool,
}

impl EdgeDetector {
    pub fn new(config: &ScrollConfig) -> Self {
        Self {
            threshold: config.edge_similarity_threshold,
            confirm_threshold: config.edge_confirm_threshold,
            required: config.edge_consecutive_required.max(1),
            consecutive: 0,
            armed: false,
        }
    }

    pub fn observe(&mut self, similarity: f64) -> EdgeState {
        if self.armed {
            if similarity >= self.confirm_threshold {
                self.reset();
                return EdgeState::Confirmed;
            }
            self.armed = false;
        }
        if similarity >= self.threshold {
            self.consecutive += 1;
            if self.consecutive >= self.required {
                self.armed = true;
                return EdgeState::Armed;
            }
        } else {
            self.consecutive = 0;
        }
        EdgeState::Progressing
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.armed = false;
    }
}

/// Enforces the per-minute scroll budget.
///
/// Within each 60 second window a jittered sub-limit triggers short pauses;
/// reaching the hard budget sleeps until the window rolls over.
pub struct RateLimiter {
    base: Option<u32>,
    jitter: f64,
    range: Option<(u32, u32)>,
    window_start: Option<f64>,
    count: f64,
    sub_limit: Option<u32>,
}

impl RateLimiter {
    pub fn new(config: &ScrollConfig) -> Self {
        Self {
            base: config.max_per_minute,
            jitter: config.spm_jitter.clamp(0.0, 0.9),
            range: config.spm_range,
            window_start: None,
            count: 0.0,
            sub_limit: None,
        }
    }

    /// Call once before every scroll increment.
    pub fn before_scroll<R: Rng>(
        &mut self,
        rng: &mut R,
        pacer: &mut dyn Pacer,
        stats: &mut ScrollStatistics,
    ) {
        if self.base.is_none() && self.range.is_none() {
            return;
        }
        let now = pacer.now();
        let mut start = match self.window_start {
            Some(start) => start,
            None => {
                self.sub_limit = self.pick_sub_limit(rng);
                now
            }
        };
        if now - start >= WINDOW_SECS {
            start = now;
            self.count = 0.0;
            self.sub_limit = self.pick_sub_limit(rng);
        }
        let hard_cap_hit = self
            .base
            .map(|base| self.count >= base as f64)
            .unwrap_or(false);
        if hard_cap_hit {
            let sleep_for = WINDOW_SECS - (now - start);
            if sleep_for > 0.0 {
                crate::log(&format!(
                    "Scroll budget exhausted, pausing {sleep_for:.1}s until the next window"
                ));
                pacer.sleep(sleep_for);
            }
            stats.rate_limit_pauses += 1;
            start = pacer.now();
            self.count = 0.0;
            self.sub_limit = self.pick_sub_limit(rng);
        } else if let Some(sub) = self.sub_limit {
            if self.count >= sub as f64 {
                let pause = rng.gen_range(0.8..=2.2);
                pacer.sleep(pause);
                stats.rate_limit_pauses += 1;
                self.count -= sub as f64 / 2.0;
            }
        }
        self.count += 1.0;
        self.window_start = Some(start);
    }

    fn pick_sub_limit<R: Rng>(&self, rng: &mut R) -> Option<u32> {
        if let Some((low, high)) = self.range {
            let (low, high) = (low.min(high), low.max(high));
            Some(rng.gen_range(low..=high))
        } else if let Some(base) = self.base {
            let scaled = (base as f64) * (1.0 - self.jitter * rng.gen_range(0.0..1.0));
            Some(scaled.round().max(1.0) as u32)
        } else {
            None
        }
    }
}

/// Distance model for the progressive strategy.
#[derive(Default)]
struct ProgressiveState {
    increments: u64,
    recent: VecDeque<f64>,
}

impl ProgressiveState {
    fn next_distance<R: Rng>(&mut self, rng: &mut R, config: &ScrollConfig) -> f64 {
        let low = config.distance_min.min(config.distance_max);
        let high = config.distance_min.max(config.distance_max);
        let mut distance = rng.gen_range(low..=high) as f64;
        if config.inertia && !self.recent.is_empty() {
            let avg: f64 = self.recent.iter().sum::<f64>() / self.recent.len() as f64;
            distance = avg * rng.gen_range(0.8..=1.2);
        }
        // The periodic long pull is applied after the inertial average so
        // it reaches the output instead of being smoothed away.
        self.increments += 1;
        if self.increments % 5 == 0 {
            distance *= 1.5;
        }
        distance = distance.clamp(low as f64, high as f64 * 2.0);
        if self.recent.len() >= RECENT_DISTANCES {
            self.recent.pop_front();
        }
        self.recent.push_back(distance);
        distance
    }
}

struct Session {
    window: WindowInfo,
    chat_area: Rectangle,
}

/// Drives the viewport and reports per-increment outcomes.
pub struct ScrollController {
    config: ScrollConfig,
    window_config: WindowConfig,
    progressive: ProgressiveState,
    edge: EdgeDetector,
    limiter: RateLimiter,
    stats: ScrollStatistics,
    session: Option<Session>,
    last_change_at: Option<f64>,
    relocations: u32,
}

impl ScrollController {
    pub fn new(config: ScrollConfig, window_config: WindowConfig) -> Self {
        let edge = EdgeDetector::new(&config);
        let limiter = RateLimiter::new(&config);
        Self {
            config,
            window_config,
            progressive: ProgressiveState::default(),
            edge,
            limiter,
            stats: ScrollStatistics::default(),
            session: None,
            last_change_at: None,
            relocations: 0,
        }
    }

    /// Locates and activates the chat window, estimates the chat area, and
    /// parks the pointer inside it so wheel input lands there. Falls back to
    /// a configured chat-area override when no window can be located.
    pub fn bind(&mut self, window: &mut dyn WindowControl) -> Result<Rectangle> {
        let keywords = title_keywords(&self.window_config);
        let info = match window.locate(&keywords) {
            Ok(info) => info,
            Err(err) => match self.window_config.chat_area_override {
                Some(area) => {
                    crate::log(&format!(
                        "Window not located ({err:#}), using configured chat area"
                    ));
                    WindowInfo {
                        handle: 0,
                        bounds: area,
                        title: String::new(),
                    }
                }
                None => return Err(err),
            },
        };
        if info.handle != 0 {
            window.activate(&info)?;
        }
        let chat_area = estimate_chat_area(&info.bounds, &self.window_config);
        let (cx, cy) = chat_area.center();
        window.move_pointer(cx, cy)?;
        self.session = Some(Session {
            window: info,
            chat_area,
        });
        self.last_change_at = None;
        Ok(chat_area)
    }

    pub fn chat_area(&self) -> Option<Rectangle> {
        self.session.as_ref().map(|s| s.chat_area)
    }

    pub fn window_info(&self) -> Option<&WindowInfo> {
        self.session.as_ref().map(|s| &s.window)
    }

    pub fn statistics(&self) -> ScrollStatistics {
        self.stats
    }

    pub fn speed(&self) -> u32 {
        self.config.speed
    }

    /// Adjusts the scroll speed, kept inside the valid 1-10 range.
    pub fn set_speed(&mut self, speed: u32) {
        self.config.speed = speed.clamp(1, 10);
    }

    pub fn delay_secs(&self) -> f64 {
        self.config.delay_secs
    }

    pub fn set_delay_secs(&mut self, delay: f64) {
        self.config.delay_secs = delay.clamp(0.1, 10.0);
    }

    /// One scroll increment: rate limit, scroll, pause, capture, compare.
    pub fn advance<R: Rng>(
        &mut self,
        window: &mut dyn WindowControl,
        capture: &mut CaptureEngine,
        rng: &mut R,
        pacer: &mut dyn Pacer,
    ) -> Result<ScrollOutcome> {
        let chat_area = match &self.session {
            Some(session) => session.chat_area,
            None => self.bind(window)?,
        };
        self.limiter.before_scroll(rng, pacer, &mut self.stats);

        // An armed edge candidate gets a minimal confirmation scroll so a
        // transient no-op is not mistaken for the end of the history.
        let notches = if self.edge.is_armed() {
            CONFIRM_NOTCHES
        } else {
            self.next_notches(rng)
        };
        window.scroll(self.config.direction, notches)?;
        self.stats.total_scrolls += 1;
        self.stats.total_notches += notches as u64;
        self.pause_after_scroll(rng, pacer);

        let frame = match capture.capture(&chat_area) {
            Ok(frame) => frame,
            Err(err) => {
                let recoverable = err
                    .downcast_ref::<ExtractError>()
                    .map(ExtractError::is_recoverable)
                    .unwrap_or(false);
                if !recoverable {
                    return Err(err);
                }
                return self.relocate(window, capture, &format!("capture failed: {err:#}"));
            }
        };
        let similarity = match capture.history().previous() {
            Some(previous) => frame_similarity(&previous.image, &frame.image),
            None => {
                self.last_change_at = Some(pacer.now());
                return Ok(ScrollOutcome::Advanced);
            }
        };

        match self.edge.observe(similarity) {
            EdgeState::Confirmed => {
                self.stats.edge_confirmations += 1;
                crate::log(&format!(
                    "Edge confirmed at similarity {similarity:.3} after {} scrolls",
                    self.stats.total_scrolls
                ));
                return Ok(ScrollOutcome::AtEdge);
            }
            EdgeState::Armed => return Ok(ScrollOutcome::Advanced),
            EdgeState::Progressing => {}
        }

        let now = pacer.now();
        if similarity < self.config.edge_similarity_threshold {
            self.last_change_at = Some(now);
            self.relocations = 0;
            return Ok(ScrollOutcome::Advanced);
        }
        match self.last_change_at {
            Some(since) if now - since > self.config.stale_after_secs => {
                self.relocate(window, capture, "content stale beyond the watchdog limit")
            }
            Some(_) => Ok(ScrollOutcome::Advanced),
            None => {
                self.last_change_at = Some(now);
                Ok(ScrollOutcome::Advanced)
            }
        }
    }

    /// Bursts upward until two consecutive settled frames, giving a known
    /// starting point at the top of the history. Returns false when the cap
    /// on checks ran out before the view settled.
    pub fn scroll_to_top(
        &mut self,
        window: &mut dyn WindowControl,
        capture: &mut CaptureEngine,
        pacer: &mut dyn Pacer,
    ) -> Result<bool> {
        const BURST_SCROLLS: u32 = 5;
        const MAX_CHECKS: u32 = 10;
        const SETTLED: f64 = 0.98;

        let chat_area = match &self.session {
            Some(session) => session.chat_area,
            None => self.bind(window)?,
        };
        let notches = (self.config.speed * 3).max(1);
        let mut consecutive = 0u32;
        for _ in 0..MAX_CHECKS {
            for _ in 0..BURST_SCROLLS {
                window.scroll(ScrollDirection::Up, notches)?;
                self.stats.total_scrolls += 1;
                self.stats.total_notches += notches as u64;
            }
            pacer.sleep(0.3);
            let frame = capture.capture(&chat_area)?;
            let settled = match capture.history().previous() {
                Some(previous) => frame_similarity(&previous.image, &frame.image) >= SETTLED,
                None => false,
            };
            if settled {
                consecutive += 1;
                if consecutive >= 2 {
                    return Ok(true);
                }
            } else {
                consecutive = 0;
            }
        }
        Ok(false)
    }

    /// Checks whether the view is already at an edge in the given direction
    /// using a single minimal scroll and a before/after comparison.
    pub fn probe_edge(
        &mut self,
        window: &mut dyn WindowControl,
        capture: &mut CaptureEngine,
        direction: ScrollDirection,
        pacer: &mut dyn Pacer,
    ) -> Result<bool> {
        let chat_area = match &self.session {
            Some(session) => session.chat_area,
            None => self.bind(window)?,
        };
        let before = capture.capture(&chat_area)?;
        window.scroll(direction, CONFIRM_NOTCHES)?;
        self.stats.total_scrolls += 1;
        self.stats.total_notches += CONFIRM_NOTCHES as u64;
        pacer.sleep(0.3);
        let after = capture.capture(&chat_area)?;
        let similarity = frame_similarity(&before.image, &after.image);
        Ok(similarity >= self.config.edge_similarity_threshold)
    }

    fn next_notches<R: Rng>(&mut self, rng: &mut R) -> u32 {
        match self.config.strategy {
            ScrollStrategy::Fixed => (self.config.speed * 3).max(1),
            ScrollStrategy::Progressive => {
                let distance = self.progressive.next_distance(rng, &self.config);
                ((distance * self.config.speed as f64) / 2.0).max(1.0) as u32
            }
        }
    }

    fn pause_after_scroll<R: Rng>(&mut self, rng: &mut R, pacer: &mut dyn Pacer) {
        match self.config.strategy {
            ScrollStrategy::Fixed => {
                if self.config.delay_secs > 0.0 {
                    pacer.sleep(self.config.delay_secs);
                }
            }
            ScrollStrategy::Progressive => {
                let low = self.config.interval_min_secs.min(self.config.interval_max_secs);
                let high = self.config.interval_min_secs.max(self.config.interval_max_secs);
                pacer.sleep(rng.gen_range(low..=high));
                if rng.gen_range(0.0..1.0) < self.config.micro_pause_probability {
                    self.stats.micro_pauses += 1;
                    pacer.sleep(rng.gen_range(1.2..=2.6));
                }
            }
        }
    }

    fn relocate(
        &mut self,
        window: &mut dyn WindowControl,
        capture: &mut CaptureEngine,
        reason: &str,
    ) -> Result<ScrollOutcome> {
        self.relocations += 1;
        if self.relocations > self.config.relocate_attempts {
            crate::log(&format!(
                "Scroll stalled after {} re-acquisition attempts ({reason})",
                self.config.relocate_attempts
            ));
            return Ok(ScrollOutcome::Stalled);
        }
        crate::log(&format!(
            "Re-acquiring window, attempt {}/{} ({reason})",
            self.relocations, self.config.relocate_attempts
        ));
        self.session = None;
        capture.reset_history();
        self.bind(window)?;
        self.stats.stall_recoveries += 1;
        Ok(ScrollOutcome::Advanced)
    }
}

/// Cooperative stop request: true when the pointer sits in a screen corner.
pub fn pointer_in_corner(window: &mut dyn WindowControl, margin: i32) -> Result<bool> {
    let (x, y) = window.pointer_position()?;
    let (width, height) = window.screen_size()?;
    let (width, height) = (width as i32, height as i32);
    let near_x = x <= margin || x >= width - 1 - margin;
    let near_y = y <= margin || y >= height - 1 - margin;
    Ok(near_x && near_y)
}
