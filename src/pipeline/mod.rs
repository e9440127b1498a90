//! Extraction pipeline: orchestration, dedup, filtering, export, telemetry.
//!
//! This module provides:
//! - The iteration loop tying capture, recognition and scrolling together
//!   (`orchestrator`)
//! - Cross-batch and cross-run duplicate suppression (`dedup`)
//! - Post-extraction message filters (`filters`)
//! - Export to json/csv/txt/md (`storage`)
//! - Shared progress state and the heartbeat thread (`progress`)
//! - The rotating metrics sink fed by the heartbeat (`metrics`)

pub mod dedup;
pub mod filters;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod storage;

pub use dedup::DeduplicationIndex;
pub use filters::MessageFilter;
pub use metrics::{MetricsSink, MetricsSnapshot};
pub use orchestrator::{PipelineOrchestrator, RunSummary, StopReason};
pub use progress::{Heartbeat, ProgressState};
pub use storage::export_messages;
