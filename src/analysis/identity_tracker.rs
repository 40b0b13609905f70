// src/analysis/identity_tracker.rs
//
// Frame-to-frame identity association for person detections.
// The pose model gives no persistent IDs, so each tick's person boxes are
// matched against the boxes of the sessions that are still alive.
//
// Design:
//   - Greedy, first-detected first-served: detections are processed in
//     detector order and a session claimed this tick is off the table
//   - Pass 1: highest IoU above threshold
//   - Pass 2: nearest centroid under a pixel radius, only when pass 1 failed
//   - Otherwise a fresh identity from a counter that never goes backwards

use crate::types::{BBox, TrackId, TrackerConfig};
use tracing::{debug, info};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Iou,
    Centroid,
    New,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    /// Index into the detection slice passed to `assign`
    pub detection: usize,
    pub identity: TrackId,
    pub matched_by: MatchKind,
}

impl Assignment {
    pub fn is_new(&self) -> bool {
        self.matched_by == MatchKind::New
    }
}

// ============================================================================
// IoU COMPUTATION
// ============================================================================

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct IdentityTracker {
    pub config: TrackerConfig,
    next_id: TrackId,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config, next_id: 1 }
    }

    /// Assign every detection to a live session or a new identity.
    ///
    /// `live` is the (identity, last bbox) list of sessions that were alive
    /// at the start of the tick. No identity appears twice in the result.
    pub fn assign(&mut self, live: &[(TrackId, BBox)], detections: &[BBox]) -> Vec<Assignment> {
        let mut claimed: Vec<bool> = vec![false; live.len()];
        let mut assignments = Vec::with_capacity(detections.len());

        for (di, det) in detections.iter().enumerate() {
            let matched = self
                .best_iou(live, &claimed, det)
                .map(|li| (li, MatchKind::Iou))
                .or_else(|| {
                    self.nearest_centroid(live, &claimed, det)
                        .map(|li| (li, MatchKind::Centroid))
                });

            let assignment = match matched {
                Some((li, kind)) => {
                    claimed[li] = true;
                    if kind == MatchKind::Centroid {
                        debug!(
                            "Centroid rescue: P{} <- det {} (dist={:.0}px)",
                            live[li].0,
                            di,
                            live[li].1.centroid_distance(det)
                        );
                    }
                    Assignment {
                        detection: di,
                        identity: live[li].0,
                        matched_by: kind,
                    }
                }
                None => {
                    let identity = self.allocate();
                    info!(
                        "New identity P{}: bbox=[{:.0},{:.0},{:.0},{:.0}]",
                        identity, det.x1, det.y1, det.x2, det.y2
                    );
                    Assignment {
                        detection: di,
                        identity,
                        matched_by: MatchKind::New,
                    }
                }
            };
            assignments.push(assignment);
        }

        assignments
    }

    fn best_iou(&self, live: &[(TrackId, BBox)], claimed: &[bool], det: &BBox) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (li, (_, bbox)) in live.iter().enumerate() {
            if claimed[li] {
                continue;
            }
            let score = iou(det, bbox);
            if score <= self.config.iou_match_threshold {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((li, score));
            }
        }
        best.map(|(li, _)| li)
    }

    fn nearest_centroid(
        &self,
        live: &[(TrackId, BBox)],
        claimed: &[bool],
        det: &BBox,
    ) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (li, (_, bbox)) in live.iter().enumerate() {
            if claimed[li] {
                continue;
            }
            let dist = det.centroid_distance(bbox);
            if dist >= self.config.distance_match_threshold_px {
                continue;
            }
            if best.map_or(true, |(_, best_dist)| dist < best_dist) {
                best = Some((li, dist));
            }
        }
        best.map(|(li, _)| li)
    }

    fn allocate(&mut self) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Number of identities handed out since creation or the last reset.
    pub fn allocated_count(&self) -> u32 {
        self.next_id - 1
    }

    pub fn reset(&mut self) {
        self.next_id = 1;
    }
}

// ============================================================================
// TESTS
// ============================================================================
