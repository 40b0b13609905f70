// src/replay.rs
//
// Recorded detector output, replayed frame by frame in place of a live
// perception model. One JSON object per line:
//
//   {"timestamp_s": 1.5,
//    "persons": [[[x, y, conf], ... 17 joints], ...],
//    "objects": [{"class_id": 67, "bbox": [x1, y1, x2, y2], "confidence": 0.8}]}

use crate::types::{BBox, DetectionFrame, ObjectBox, ObjectClass, Pose, RuntimeConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Anything that yields detection frames in tick order.
pub trait DetectionSource {
    /// `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>>;
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    timestamp_s: f64,
    #[serde(default)]
    persons: Vec<Vec<[f32; 3]>>,
    #[serde(default)]
    objects: Vec<RawObject>,
    /// Recorded wall-clock time, when the recorder had one
    #[serde(default)]
    captured_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    class_id: u32,
    bbox: [f32; 4],
    confidence: f32,
}

pub struct JsonlReplaySource<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
    next_frame_id: u64,
    conf_threshold: f32,
    offset: FixedOffset,
    started_at: DateTime<FixedOffset>,
    first_timestamp: Option<f64>,
}

impl JsonlReplaySource<BufReader<File>> {
    pub fn open(path: &Path, runtime: &RuntimeConfig, offset: FixedOffset) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open detection log {}", path.display()))?;
        info!("Replaying detections from: {}", path.display());
        Ok(Self::from_reader(
            BufReader::new(file),
            runtime.conf_threshold,
            offset,
        ))
    }
}

impl<R: BufRead> JsonlReplaySource<R> {
    pub fn from_reader(reader: R, conf_threshold: f32, offset: FixedOffset) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            next_frame_id: 0,
            conf_threshold,
            offset,
            started_at: Utc::now().with_timezone(&offset),
            first_timestamp: None,
        }
    }

    /// Anchor for wall-clock stamps of frames without `captured_at`.
    #[cfg(test)]
    pub fn with_start(mut self, started_at: DateTime<FixedOffset>) -> Self {
        self.started_at = started_at;
        self
    }

    fn convert(&mut self, raw: RawFrame) -> DetectionFrame {
        let first = *self.first_timestamp.get_or_insert(raw.timestamp_s);
        let wall_time = match raw.captured_at {
            Some(at) => at.with_timezone(&self.offset),
            None => {
                let elapsed_ms = ((raw.timestamp_s - first) * 1000.0).round() as i64;
                self.started_at + Duration::milliseconds(elapsed_ms)
            }
        };

        let mut frame = DetectionFrame::new(self.next_frame_id, raw.timestamp_s, wall_time);
        self.next_frame_id += 1;

        frame.persons = raw
            .persons
            .iter()
            .map(|joints| Pose::from_triplets(joints))
            .collect();

        let conf_threshold = self.conf_threshold;
        frame.objects = raw
            .objects
            .into_iter()
            .filter(|o| o.confidence >= conf_threshold)
            .filter_map(|o| {
                ObjectClass::from_coco_id(o.class_id).map(|class| ObjectBox {
                    class,
                    bbox: BBox::from_array(o.bbox),
                    confidence: o.confidence,
                })
            })
            .collect();

        frame
    }
}

impl<R: BufRead> DetectionSource for JsonlReplaySource<R> {
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line = line.with_context(|| format!("Failed to read line {}", self.line_no))?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawFrame = serde_json::from_str(&line)
                .with_context(|| format!("Malformed detection frame on line {}", self.line_no))?;
            return Ok(Some(self.convert(raw)));
        }
        Ok(None)
    }
}

/// All `*.jsonl` detection logs under `dir`, sorted by path.
pub fn find_detection_logs(dir: &str) -> Result<Vec<PathBuf>> {
    let mut logs: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "jsonl"))
        .collect();
    logs.sort();

    debug!("Found {} detection log(s) in {}", logs.len(), dir);
    Ok(logs)
}
