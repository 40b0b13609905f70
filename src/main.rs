// src/main.rs

mod analysis;
mod config;
mod overlay;
mod pipeline;
mod replay;
mod sink;
mod types;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use pipeline::ActivityPipeline;
use replay::{DetectionSource, JsonlReplaySource};
use sink::{EventSink, JsonlEventSink, MemorySink};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;

const CONFIG_PATH: &str = "config.yaml";
const METRICS_LOG_INTERVAL: u64 = 300;

#[derive(Debug, Default)]
struct LogStats {
    total_ticks: u64,
    failed_ticks: u64,
    identities_allocated: u64,
    alerts: usize,
    completed_sessions: usize,
    peak_tracked: usize,
    peak_sitting: usize,
    elapsed: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid logging.level filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🪑 Activity Tracker Starting");
    if Path::new(CONFIG_PATH).exists() {
        info!("✓ Configuration loaded from {}", CONFIG_PATH);
    } else {
        warn!("{} not found, using built-in defaults", CONFIG_PATH);
    }

    info!(
        "Posture thresholds: min_score={}, knee={:.0}-{:.0}°, head_down>{:.2}",
        config.posture.sitting_min_score,
        config.posture.knee_angle_min_deg,
        config.posture.knee_angle_max_deg,
        config.posture.head_down_ratio_threshold
    );

    let offset = config.utc_offset()?;
    let logs = replay::find_detection_logs(&config.runtime.input_dir)?;
    if logs.is_empty() {
        error!("No detection logs found in {}", config.runtime.input_dir);
        return Ok(());
    }
    info!("Found {} detection log(s) to process", logs.len());

    let output_dir = Path::new(&config.runtime.output_dir);
    let mut sink = (JsonlEventSink::create(output_dir)?, MemorySink::new());
    let mut pipeline = ActivityPipeline::new(&config);

    for (idx, log_path) in logs.iter().enumerate() {
        info!("========================================");
        info!(
            "Processing log {}/{}: {}",
            idx + 1,
            logs.len(),
            log_path.display()
        );
        info!("========================================");

        match process_log(log_path, &config, offset, &mut pipeline, &mut sink).await {
            Ok(stats) => {
                let fps = if stats.elapsed.as_secs_f64() > 0.0 {
                    stats.total_ticks as f64 / stats.elapsed.as_secs_f64()
                } else {
                    0.0
                };
                info!("✓ Log processed");
                info!("  Ticks: {} ({} failed)", stats.total_ticks, stats.failed_ticks);
                info!("  New identities: {}", stats.identities_allocated);
                info!(
                    "  Peak people in frame: {} ({} sitting)",
                    stats.peak_tracked, stats.peak_sitting
                );
                info!("  🚨 Alerts: {}", stats.alerts);
                info!("  🪑 Completed sitting sessions: {}", stats.completed_sessions);
                info!("  Effective FPS: {:.1}", fps);
            }
            Err(e) => {
                error!("Failed to process {}: {:#}", log_path.display(), e);
            }
        }

        report_history(&sink.1);
        sink.1.clear();
    }

    info!("Events written to {}", sink.0.path().display());

    Ok(())
}

/// Summarize the events recorded for the log that just finished.
fn report_history(history: &MemorySink) {
    let longest = history
        .recent_sessions()
        .map(|s| s.duration_seconds)
        .max()
        .unwrap_or(0);
    info!(
        "  History: {} alert(s), {} sitting session(s), average sit {}s, longest {}",
        history.alert_count(),
        history.session_count(),
        history.average_sitting_seconds(),
        overlay::format_timer(longest)
    );
    if let Some(latest) = history.recent_alerts().next() {
        info!(
            "  Latest alert: {} at {}",
            latest.description,
            latest.occurred_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

/// Replay one detection log through the pipeline.
///
/// Live sessions are always flushed and the tracking state reset when the
/// log ends, including when it ends early on a malformed line, so nothing
/// carries over into the next log's clock.
async fn process_log(
    log_path: &Path,
    config: &Config,
    offset: FixedOffset,
    pipeline: &mut ActivityPipeline,
    sink: &mut dyn EventSink,
) -> Result<LogStats> {
    let mut source = JsonlReplaySource::open(log_path, &config.runtime, offset)?;
    let frame_interval = if config.runtime.fps_limit > 0 {
        Some(Duration::from_secs_f64(1.0 / config.runtime.fps_limit as f64))
    } else {
        None
    };

    let started = Instant::now();
    let allocated_before = pipeline.metrics().identities_allocated.load(Ordering::Relaxed);
    let mut stats = LogStats::default();
    let mut last_wall_time: Option<DateTime<FixedOffset>> = None;

    let read_error = loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break None,
            Err(e) => break Some(e),
        };
        let tick_started = Instant::now();
        stats.total_ticks += 1;
        last_wall_time = Some(frame.wall_time);

        match pipeline.tick(&frame, sink) {
            Ok(output) => {
                stats.alerts += output.alerts.len();
                stats.completed_sessions += output.completed_sessions.len();
                stats.peak_tracked = stats.peak_tracked.max(output.tracked);
                stats.peak_sitting = stats.peak_sitting.max(output.sitting);

                for entry in &output.overlays {
                    debug!(
                        "Frame {} P{} {} {} at ({:.0},{:.0})",
                        output.frame_id,
                        entry.identity,
                        entry.status_label(),
                        entry.timer_text(),
                        entry.head_position.0,
                        entry.head_position.1
                    );
                }
            }
            Err(e) => {
                stats.failed_ticks += 1;
                error!("Tick {} failed: {:#}", frame.frame_id, e);
            }
        }

        let total = pipeline.metrics().total_ticks.load(Ordering::Relaxed);
        if total % METRICS_LOG_INTERVAL == 0 {
            let summary = pipeline.metrics().summary();
            info!(
                "📊 ticks={} fps={:.1} persons={} untracked={} live={} sitting_now={} flips={} alerts={} sessions={} sink_failures={} dropped={} last_tick={}µs",
                summary.total_ticks,
                summary.fps,
                summary.persons_detected,
                summary.untracked_persons,
                pipeline.live_sessions(),
                pipeline.current_sitting(),
                summary.status_changes,
                summary.alerts_emitted,
                summary.sitting_sessions_completed,
                summary.sink_failures,
                summary.events_dropped,
                summary.last_tick_us
            );
        }

        if let Some(interval) = frame_interval {
            let spent = tick_started.elapsed();
            if spent < interval {
                tokio::time::sleep(interval - spent).await;
            }
        }
    };

    // End of stream: nobody is left to expire naturally
    let wall_time = last_wall_time.unwrap_or_else(|| Utc::now().with_timezone(&offset));
    match pipeline.finish(wall_time, sink) {
        Ok(flushed) => stats.completed_sessions += flushed.len(),
        Err(e) => error!("Flushing sessions failed: {:#}", e),
    }
    stats.identities_allocated =
        pipeline.metrics().identities_allocated.load(Ordering::Relaxed) - allocated_before;
    pipeline.reset();

    if let Some(e) = read_error {
        return Err(e).with_context(|| {
            format!(
                "Replay stopped after {} frame(s) of {}",
                stats.total_ticks,
                log_path.display()
            )
        });
    }

    stats.elapsed = started.elapsed();
    Ok(stats)
}
