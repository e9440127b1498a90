//! Run progress tracking and the background heartbeat.
//!
//! The heartbeat thread samples process CPU and memory on a fixed interval,
//! logs advisory warnings when configured thresholds are crossed, and
//! appends snapshots to the metrics sink. It only reads pipeline state;
//! crossing a threshold never aborts the run.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::config::WatchdogConfig;
use crate::pipeline::metrics::{MetricsSink, MetricsSnapshot};

/// Counters shared between the iteration loop and the heartbeat thread.
#[derive(Default)]
pub struct ProgressState {
    status: Mutex<String>,
    messages: AtomicUsize,
    attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl ProgressState {
    pub fn set_status(&self, status: &str) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status.to_string();
        }
    }

    pub fn status(&self) -> String {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set_messages(&self, count: usize) {
        self.messages.store(count, Ordering::SeqCst);
    }

    pub fn messages(&self) -> usize {
        self.messages.load(Ordering::SeqCst)
    }

    pub fn add_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_last_error(&self, error: &str) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(error.to_string());
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().map(|e| e.clone()).unwrap_or(None)
    }
}

/// Background sampling thread handle. Dropping it stops the thread.
pub struct Heartbeat {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn start(
        config: &WatchdogConfig,
        state: Arc<ProgressState>,
        sink: Option<MetricsSink>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let interval = Duration::from_secs_f64(config.heartbeat_secs.max(1.0));
        let cpu_threshold = config.cpu_threshold;
        let mem_threshold = config.mem_threshold_mb;

        let handle = thread::spawn(move || {
            let mut system = System::new();
            let pid = Pid::from_u32(std::process::id());
            // Initial refresh establishes the baseline for CPU deltas.
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

            let slice = Duration::from_millis(100);
            loop {
                let mut waited = Duration::ZERO;
                while waited < interval && !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(slice);
                    waited += slice;
                }
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
                let (cpu_percent, memory_mb) = match system.process(pid) {
                    Some(process) => (
                        process.cpu_usage(),
                        process.memory() as f64 / 1024.0 / 1024.0,
                    ),
                    None => (0.0, 0.0),
                };

                if let Some(limit) = cpu_threshold {
                    if cpu_percent > limit {
                        crate::log(&format!(
                            "High CPU usage: {cpu_percent:.1}% (threshold {limit:.1}%)"
                        ));
                    }
                }
                if let Some(limit) = mem_threshold {
                    if memory_mb > limit {
                        crate::log(&format!(
                            "High memory usage: {memory_mb:.1} MB (threshold {limit:.1} MB)"
                        ));
                    }
                }
                if let Some(sink) = &sink {
                    let snapshot = MetricsSnapshot {
                        status: state.status(),
                        messages: state.messages(),
                        attempts: state.attempts(),
                        cpu_percent,
                        memory_mb,
                    };
                    if let Err(err) = sink.record(&snapshot) {
                        crate::log(&format!("Metrics write failed: {err:#}"));
                    }
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(self) {}
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
