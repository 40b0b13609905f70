// src/sink.rs
//
// Downstream consumers of finalized sitting sessions and alerts.
// Persistence and reporting live behind this trait; the tick loop only
// hands events over.

use crate::types::{AlertEvent, CompletedSittingSession};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const MAX_RECENT_ALERTS: usize = 100;
const MAX_RECENT_SESSIONS: usize = 50;

pub trait EventSink {
    fn record_sitting_session(&mut self, session: &CompletedSittingSession) -> Result<()>;

    /// `snapshot` is the encoded rendered frame at the time of the alert.
    fn record_alert(&mut self, alert: &AlertEvent, snapshot: Option<&[u8]>) -> Result<()>;
}

/// Deliver to both sinks; the first failure is reported after both ran.
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn record_sitting_session(&mut self, session: &CompletedSittingSession) -> Result<()> {
        let first = self.0.record_sitting_session(session);
        let second = self.1.record_sitting_session(session);
        first.and(second)
    }

    fn record_alert(&mut self, alert: &AlertEvent, snapshot: Option<&[u8]>) -> Result<()> {
        let first = self.0.record_alert(alert, snapshot);
        let second = self.1.record_alert(alert, snapshot);
        first.and(second)
    }
}

// ============================================================================
// JSONL FILE SINK
// ============================================================================

/// Appends one JSON object per event to `events.jsonl` and stores alert
/// snapshots under `captures/`.
pub struct JsonlEventSink {
    file: File,
    captures_dir: PathBuf,
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn create(output_dir: &Path) -> Result<Self> {
        let captures_dir = output_dir.join("captures");
        fs::create_dir_all(&captures_dir)
            .with_context(|| format!("Failed to create {}", captures_dir.display()))?;

        let path = output_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        info!("💾 Events will be appended to: {}", path.display());

        Ok(Self {
            file,
            captures_dir,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, value: &serde_json::Value) -> Result<()> {
        let json_line = serde_json::to_string(value)?;
        writeln!(self.file, "{}", json_line)?;
        self.file.flush()?;
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn record_sitting_session(&mut self, session: &CompletedSittingSession) -> Result<()> {
        let json_value = serde_json::json!({
            "type": "sitting_session",
            "person_id": session.identity,
            "duration": session.duration_seconds,
            "timestamp": session.ended_at.format("%H:%M:%S").to_string(),
            "date": session.ended_at.format("%Y-%m-%d").to_string(),
            "ended_at": session.ended_at.to_rfc3339(),
        });
        self.write_line(&json_value)
            .context("Failed to write sitting session")?;
        info!("💾 Sitting session P{} saved to JSONL", session.identity);
        Ok(())
    }

    fn record_alert(&mut self, alert: &AlertEvent, snapshot: Option<&[u8]>) -> Result<()> {
        let filename = match snapshot {
            Some(bytes) => {
                // Event id suffix keeps same-second captures apart
                let event_id = alert.event_id.simple().to_string();
                let name = format!(
                    "capture_{}_{}.jpg",
                    alert.occurred_at.format("%Y%m%d_%H%M%S"),
                    &event_id[..8]
                );
                let capture_path = self.captures_dir.join(&name);
                fs::write(&capture_path, bytes).with_context(|| {
                    format!("Failed to write snapshot {}", capture_path.display())
                })?;
                Some(name)
            }
            None => None,
        };

        let objects: Vec<&str> = alert.objects.iter().map(|o| o.as_str()).collect();
        let json_value = serde_json::json!({
            "type": "alert",
            "event_id": alert.event_id.to_string(),
            "kind": alert.kind.as_str(),
            "description": alert.description,
            "objects": objects,
            "filename": filename,
            "timestamp": alert.occurred_at.format("%H:%M:%S").to_string(),
            "date": alert.occurred_at.format("%Y-%m-%d").to_string(),
            "occurred_at": alert.occurred_at.to_rfc3339(),
        });
        self.write_line(&json_value).context("Failed to write alert")?;
        info!("💾 {} alert saved to JSONL", alert.kind.as_str());
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY SINK
// ============================================================================

/// Bounded newest-first history of recent events, for quick status lookups.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: VecDeque<AlertEvent>,
    sessions: VecDeque<CompletedSittingSession>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent_alerts(&self) -> impl Iterator<Item = &AlertEvent> {
        self.alerts.iter()
    }

    pub fn recent_sessions(&self) -> impl Iterator<Item = &CompletedSittingSession> {
        self.sessions.iter()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Mean duration of the retained sitting sessions, in whole seconds.
    pub fn average_sitting_seconds(&self) -> u64 {
        if self.sessions.is_empty() {
            return 0;
        }
        let total: u64 = self.sessions.iter().map(|s| s.duration_seconds).sum();
        total / self.sessions.len() as u64
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
        self.sessions.clear();
    }
}

impl EventSink for MemorySink {
    fn record_sitting_session(&mut self, session: &CompletedSittingSession) -> Result<()> {
        self.sessions.push_front(session.clone());
        self.sessions.truncate(MAX_RECENT_SESSIONS);
        Ok(())
    }

    fn record_alert(&mut self, alert: &AlertEvent, _snapshot: Option<&[u8]>) -> Result<()> {
        self.alerts.push_front(alert.clone());
        self.alerts.truncate(MAX_RECENT_ALERTS);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKind, ObjectClass};
    use chrono::{DateTime, FixedOffset, TimeZone};
    use uuid::Uuid;

    fn wall(sec: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 9, 30, sec)
            .unwrap()
    }

    fn session(identity: u32, duration_seconds: u64) -> CompletedSittingSession {
        CompletedSittingSession {
            identity,
            duration_seconds,
            ended_at: wall(0),
        }
    }

    fn alert(sec: u32) -> AlertEvent {
        AlertEvent {
            event_id: Uuid::new_v4(),
            kind: AlertKind::PhoneUsage,
            occurred_at: wall(sec),
            description: "Person detected using phone near Laptop".to_string(),
            objects: vec![ObjectClass::Laptop],
        }
    }

    #[test]
    fn test_memory_sink_is_bounded_newest_first() {
        let mut sink = MemorySink::new();
        for i in 0..60 {
            sink.record_sitting_session(&session(i, 10)).unwrap();
        }
        assert_eq!(sink.session_count(), MAX_RECENT_SESSIONS);
        assert_eq!(sink.recent_sessions().next().unwrap().identity, 59);

        for _ in 0..120 {
            sink.record_alert(&alert(0), None).unwrap();
        }
        assert_eq!(sink.alert_count(), MAX_RECENT_ALERTS);

        sink.clear();
        assert_eq!(sink.alert_count(), 0);
        assert_eq!(sink.session_count(), 0);
    }

    #[test]
    fn test_memory_sink_average() {
        let mut sink = MemorySink::new();
        assert_eq!(sink.average_sitting_seconds(), 0);
        sink.record_sitting_session(&session(1, 6)).unwrap();
        sink.record_sitting_session(&session(2, 9)).unwrap();
        assert_eq!(sink.average_sitting_seconds(), 7);
    }

    #[test]
    fn test_jsonl_sink_writes_events_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlEventSink::create(dir.path()).unwrap();

        sink.record_sitting_session(&session(3, 8)).unwrap();
        sink.record_alert(&alert(15), Some(&[0xFF, 0xD8, 0xFF])).unwrap();

        let contents = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["type"], "sitting_session");
        assert_eq!(lines[0]["person_id"], 3);
        assert_eq!(lines[0]["duration"], 8);
        assert_eq!(lines[0]["date"], "2024-05-01");
        assert_eq!(lines[0]["timestamp"], "09:30:00");

        assert_eq!(lines[1]["type"], "alert");
        assert_eq!(lines[1]["kind"], "Phone Usage");
        assert_eq!(lines[1]["objects"][0], "Laptop");
        let filename = lines[1]["filename"].as_str().unwrap();
        assert!(filename.starts_with("capture_20240501_093015_"));
        assert!(filename.ends_with(".jpg"));

        let capture = dir.path().join("captures").join(filename);
        assert_eq!(fs::read(capture).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_same_second_snapshots_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlEventSink::create(dir.path()).unwrap();

        sink.record_alert(&alert(15), Some(&[1])).unwrap();
        sink.record_alert(&alert(15), Some(&[2])).unwrap();

        let captures: Vec<_> = fs::read_dir(dir.path().join("captures"))
            .unwrap()
            .map(|e| fs::read(e.unwrap().path()).unwrap())
            .collect();
        assert_eq!(captures.len(), 2);
        assert!(captures.contains(&vec![1]));
        assert!(captures.contains(&vec![2]));
    }

    #[test]
    fn test_tee_sink_delivers_to_both() {
        let mut tee = (MemorySink::new(), MemorySink::new());
        tee.record_alert(&alert(1), None).unwrap();
        assert_eq!(tee.0.alert_count(), 1);
        assert_eq!(tee.1.alert_count(), 1);
    }
}
