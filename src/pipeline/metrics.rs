// src/pipeline/metrics.rs
//
// Counters and timings for the tick loop, summarized into the logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_ticks: Arc<AtomicU64>,
    pub persons_detected: Arc<AtomicU64>,
    pub untracked_persons: Arc<AtomicU64>,
    pub identities_allocated: Arc<AtomicU64>,
    pub alerts_emitted: Arc<AtomicU64>,
    pub sitting_sessions_completed: Arc<AtomicU64>,
    pub sink_failures: Arc<AtomicU64>,
    pub status_changes: Arc<AtomicU64>,
    pub events_dropped: Arc<AtomicU64>,
    pub tick_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_ticks: Arc::new(AtomicU64::new(0)),
            persons_detected: Arc::new(AtomicU64::new(0)),
            untracked_persons: Arc::new(AtomicU64::new(0)),
            identities_allocated: Arc::new(AtomicU64::new(0)),
            alerts_emitted: Arc::new(AtomicU64::new(0)),
            sitting_sessions_completed: Arc::new(AtomicU64::new(0)),
            sink_failures: Arc::new(AtomicU64::new(0)),
            status_changes: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
            tick_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Overwrite a gauge-style value (last tick time, dropped events).
    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let ticks = self.total_ticks.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            ticks as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_ticks: self.total_ticks.load(Ordering::Relaxed),
            fps: self.fps(),
            persons_detected: self.persons_detected.load(Ordering::Relaxed),
            untracked_persons: self.untracked_persons.load(Ordering::Relaxed),
            identities_allocated: self.identities_allocated.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            sitting_sessions_completed: self.sitting_sessions_completed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            status_changes: self.status_changes.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            last_tick_us: self.tick_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_ticks: u64,
    pub fps: f64,
    pub persons_detected: u64,
    pub untracked_persons: u64,
    pub identities_allocated: u64,
    pub alerts_emitted: u64,
    pub sitting_sessions_completed: u64,
    pub sink_failures: u64,
    pub status_changes: u64,
    pub events_dropped: u64,
    pub last_tick_us: u64,
    pub elapsed_secs: f64,
}
