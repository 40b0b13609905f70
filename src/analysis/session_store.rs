// src/analysis/session_store.rs
//
// One session per live identity, holding the current posture episode.
//
// Per identity the state is Standing or Sitting; absence from the map is the
// implicit Untracked state. A status flip hard-resets `status_since` (the
// overlay timer restarts at 0). Sessions unseen for `session_expiry_s` are
// removed, and a Sitting session long enough at removal becomes a
// CompletedSittingSession. Each (identity, episode start) pair is finalized
// at most once.

use crate::overlay::OverlayEntry;
use crate::types::{
    BBox, CompletedSittingSession, PersonStatus, SessionConfig, TrackId,
};
use chrono::{DateTime, FixedOffset};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info};

/// Finalized episode keys kept for idempotence checks.
const FINALIZED_HISTORY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub identity: TrackId,
    pub status: PersonStatus,
    pub status_since: f64,
    pub last_seen: f64,
    pub last_bbox: BBox,
    pub last_head_pos: (f32, f32),
}

impl SessionRecord {
    /// Length of the current episode as of the last sighting.
    pub fn episode_duration(&self) -> f64 {
        self.last_seen - self.status_since
    }
}

/// One tracked person's reading for this tick.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub identity: TrackId,
    pub status: PersonStatus,
    pub bbox: BBox,
    pub head_pos: (f32, f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Continued,
    Changed {
        from: PersonStatus,
        to: PersonStatus,
    },
}

type EpisodeKey = (TrackId, u64);

pub struct SessionStore {
    config: SessionConfig,
    sessions: BTreeMap<TrackId, SessionRecord>,
    finalized: HashSet<EpisodeKey>,
    finalized_order: VecDeque<EpisodeKey>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: BTreeMap::new(),
            finalized: HashSet::new(),
            finalized_order: VecDeque::with_capacity(FINALIZED_HISTORY),
        }
    }

    /// Apply one tracked person's reading at tick time `now`.
    pub fn observe(&mut self, obs: Observation, now: f64) -> Transition {
        match self.sessions.get_mut(&obs.identity) {
            None => {
                self.sessions.insert(
                    obs.identity,
                    SessionRecord {
                        identity: obs.identity,
                        status: obs.status,
                        status_since: now,
                        last_seen: now,
                        last_bbox: obs.bbox,
                        last_head_pos: obs.head_pos,
                    },
                );
                Transition::Created
            }
            Some(record) => {
                // Never let the episode start overtake the last sighting
                let now = now.max(record.last_seen);
                let transition = if record.status != obs.status {
                    let from = record.status;
                    record.status = obs.status;
                    record.status_since = now;
                    Transition::Changed {
                        from,
                        to: obs.status,
                    }
                } else {
                    Transition::Continued
                };
                record.last_seen = now;
                record.last_bbox = obs.bbox;
                record.last_head_pos = obs.head_pos;
                transition
            }
        }
    }

    /// Remove sessions unseen for the expiry window and finalize the
    /// qualifying Sitting episodes among them.
    pub fn expire(
        &mut self,
        now: f64,
        wall_time: DateTime<FixedOffset>,
    ) -> Vec<CompletedSittingSession> {
        let expiry = self.config.session_expiry_s;
        let expired: Vec<TrackId> = self
            .sessions
            .values()
            .filter(|s| now - s.last_seen >= expiry)
            .map(|s| s.identity)
            .collect();

        let mut completed = Vec::new();
        for id in expired {
            if let Some(record) = self.sessions.remove(&id) {
                debug!(
                    "P{} expired ({} for {:.1}s)",
                    id,
                    record.status.as_str(),
                    record.episode_duration()
                );
                if let Some(done) = self.finalize(&record, wall_time) {
                    completed.push(done);
                }
            }
        }
        completed
    }

    /// Finalize and drop every live session, e.g. when the input stream ends.
    pub fn finish_all(&mut self, wall_time: DateTime<FixedOffset>) -> Vec<CompletedSittingSession> {
        let records: Vec<SessionRecord> =
            std::mem::take(&mut self.sessions).into_values().collect();
        records
            .iter()
            .filter_map(|r| self.finalize(r, wall_time))
            .collect()
    }

    fn finalize(
        &mut self,
        record: &SessionRecord,
        wall_time: DateTime<FixedOffset>,
    ) -> Option<CompletedSittingSession> {
        if record.status != PersonStatus::Sitting {
            return None;
        }

        let duration_seconds = record.episode_duration().max(0.0) as u64;
        if duration_seconds < self.config.min_sitting_duration_s {
            debug!(
                "P{} sat {}s, below the {}s minimum",
                record.identity, duration_seconds, self.config.min_sitting_duration_s
            );
            return None;
        }

        let key = (record.identity, record.status_since.to_bits());
        if !self.remember_finalized(key) {
            return None;
        }

        info!(
            "P{} finished sitting session: {}s",
            record.identity, duration_seconds
        );
        Some(CompletedSittingSession {
            identity: record.identity,
            duration_seconds,
            ended_at: wall_time,
        })
    }

    /// False when the episode was already finalized.
    fn remember_finalized(&mut self, key: EpisodeKey) -> bool {
        if !self.finalized.insert(key) {
            return false;
        }
        if self.finalized_order.len() >= FINALIZED_HISTORY {
            if let Some(oldest) = self.finalized_order.pop_front() {
                self.finalized.remove(&oldest);
            }
        }
        self.finalized_order.push_back(key);
        true
    }

    /// Overlay data for sessions seen within the render grace window.
    pub fn overlays(&self, now: f64) -> Vec<OverlayEntry> {
        self.sessions
            .values()
            .filter(|s| now - s.last_seen < self.config.render_grace_s)
            .map(|s| OverlayEntry {
                identity: s.identity,
                head_position: s.last_head_pos,
                status: s.status,
                elapsed_seconds: (now - s.status_since).max(0.0) as u64,
            })
            .collect()
    }

    /// (identity, last bbox) for every live session, ordered by identity.
    pub fn candidates(&self) -> Vec<(TrackId, BBox)> {
        self.sessions
            .values()
            .map(|s| (s.identity, s.last_bbox))
            .collect()
    }

    #[cfg(test)]
    pub fn get(&self, identity: TrackId) -> Option<&SessionRecord> {
        self.sessions.get(&identity)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sitting_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == PersonStatus::Sitting)
            .count()
    }

    pub fn reset(&mut self) {
        self.sessions.clear();
        self.finalized.clear();
        self.finalized_order.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wall() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
            .unwrap()
    }

    fn obs(identity: TrackId, status: PersonStatus) -> Observation {
        Observation {
            identity,
            status,
            bbox: BBox::new(100.0, 100.0, 200.0, 400.0),
            head_pos: (150.0, 110.0),
        }
    }

    fn store() -> SessionStore {
        SessionStore::new(SessionConfig::default())
    }

    #[test]
    fn test_new_identity_creates_session() {
        let mut s = store();
        assert_eq!(s.observe(obs(1, PersonStatus::Sitting), 2.0), Transition::Created);
        let rec = s.get(1).unwrap();
        assert_eq!(rec.status_since, 2.0);
        assert_eq!(rec.last_seen, 2.0);
        assert_eq!(rec.status, PersonStatus::Sitting);
    }

    #[test]
    fn test_same_status_keeps_timer_origin() {
        let mut s = store();
        s.observe(obs(1, PersonStatus::Standing), 0.0);
        assert_eq!(s.observe(obs(1, PersonStatus::Standing), 0.5), Transition::Continued);
        let rec = s.get(1).unwrap();
        assert_eq!(rec.status_since, 0.0);
        assert_eq!(rec.last_seen, 0.5);
    }

    #[test]
    fn test_status_flip_resets_timer() {
        let mut s = store();
        for t in [0.0, 0.5, 1.0] {
            s.observe(obs(1, PersonStatus::Sitting), t);
        }
        let transition = s.observe(obs(1, PersonStatus::Standing), 1.5);
        assert_eq!(
            transition,
            Transition::Changed {
                from: PersonStatus::Sitting,
                to: PersonStatus::Standing
            }
        );
        let rec = s.get(1).unwrap();
        assert_eq!(rec.status, PersonStatus::Standing);
        assert_eq!(rec.status_since, 1.5);
        assert_eq!(s.overlays(1.5)[0].elapsed_seconds, 0);
    }

    #[test]
    fn test_sitting_session_finalized_once() {
        let mut s = store();
        let mut t = 0.0;
        while t <= 8.0 {
            s.observe(obs(1, PersonStatus::Sitting), t);
            assert!(s.expire(t, wall()).is_empty());
            t += 0.5;
        }
        // Still within the expiry window
        assert!(s.expire(8.5, wall()).is_empty());

        let done = s.expire(9.0, wall());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].identity, 1);
        assert_eq!(done[0].duration_seconds, 8);
        assert_eq!(done[0].ended_at, wall());
        assert!(s.is_empty());

        // Re-processing the same expiry emits nothing
        assert!(s.expire(9.0, wall()).is_empty());
        assert!(s.expire(20.0, wall()).is_empty());
    }

    #[test]
    fn test_refinalizing_same_episode_is_suppressed() {
        let mut s = store();
        s.observe(obs(4, PersonStatus::Sitting), 0.0);
        s.observe(obs(4, PersonStatus::Sitting), 6.0);
        let snapshot = s.get(4).cloned().unwrap();
        assert_eq!(s.expire(7.0, wall()).len(), 1);

        // The same episode surfacing again must not produce a second record
        s.sessions.insert(4, snapshot);
        assert!(s.expire(7.0, wall()).is_empty());
    }

    #[test]
    fn test_short_sitting_not_finalized() {
        let mut s = store();
        for t in [0.0, 1.0, 2.0, 3.0] {
            s.observe(obs(1, PersonStatus::Sitting), t);
        }
        assert!(s.expire(4.0, wall()).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn test_standing_session_not_finalized() {
        let mut s = store();
        for t in 0..10 {
            s.observe(obs(1, PersonStatus::Standing), t as f64);
        }
        assert!(s.expire(11.0, wall()).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn test_expiry_boundary() {
        let mut s = store();
        s.observe(obs(1, PersonStatus::Standing), 0.0);
        s.expire(0.75, wall());
        assert_eq!(s.len(), 1);
        s.expire(1.0, wall());
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn test_render_grace_hides_stale_sessions() {
        let mut s = store();
        s.observe(obs(1, PersonStatus::Sitting), 0.0);
        s.observe(obs(2, PersonStatus::Standing), 0.25);
        let overlays = s.overlays(0.625);
        // P1 last seen 0.625s ago: alive but not drawn
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].identity, 2);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_finish_all_flushes_live_sessions() {
        let mut s = store();
        s.observe(obs(1, PersonStatus::Sitting), 0.0);
        s.observe(obs(1, PersonStatus::Sitting), 6.0);
        s.observe(obs(2, PersonStatus::Standing), 6.0);
        let done = s.finish_all(wall());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].duration_seconds, 6);
        assert!(s.is_empty());
    }

    #[test]
    fn test_sitting_count_and_candidates() {
        let mut s = store();
        s.observe(obs(2, PersonStatus::Sitting), 0.0);
        s.observe(obs(1, PersonStatus::Standing), 0.0);
        assert_eq!(s.sitting_count(), 1);
        let ids: Vec<TrackId> = s.candidates().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
