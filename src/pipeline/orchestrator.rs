// src/pipeline/orchestrator.rs
//
// Wires the identity tracker, posture classifier, session store and alert
// debouncer into one sequential tick.
//
// Single entry point: call tick() once per detection frame. All mutable
// tracking state lives in TrackState and is only touched from here, so
// ticks must not overlap.

use super::event_bus::{EventBus, PipelineEvent};
use super::metrics::PipelineMetrics;
use crate::analysis::{
    AlertDebouncer, AlertSignals, IdentityTracker, Observation, PostureClassifier,
    SessionStore, Transition,
};
use crate::overlay::OverlayEntry;
use crate::sink::EventSink;
use crate::types::{
    AlertEvent, BBox, CompletedSittingSession, Config, DetectionFrame, ObjectClass,
    PersonStatus,
};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

const MAX_PENDING_EVENTS: usize = 256;

// ============================================================================
// STATE
// ============================================================================

/// Everything that survives from one tick to the next: live sessions, the
/// identity counter and the last alert time.
pub struct TrackState {
    pub tracker: IdentityTracker,
    pub sessions: SessionStore,
    pub debouncer: AlertDebouncer,
}

impl TrackState {
    pub fn new(config: &Config) -> Self {
        Self {
            tracker: IdentityTracker::new(config.tracker.clone()),
            sessions: SessionStore::new(config.session.clone()),
            debouncer: AlertDebouncer::new(config.alert.clone()),
        }
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
        self.sessions.reset();
        self.debouncer.reset();
    }
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub frame_id: u64,
    pub overlays: Vec<OverlayEntry>,
    pub completed_sessions: Vec<CompletedSittingSession>,
    pub alerts: Vec<AlertEvent>,
    /// Persons associated with an identity this tick
    pub tracked: usize,
    /// Live sessions currently Sitting
    pub sitting: usize,
}

/// A person that can be tracked this tick: has a nose and a bounding box.
struct Trackable {
    status: PersonStatus,
    bbox: BBox,
    head_pos: (f32, f32),
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ActivityPipeline {
    state: TrackState,
    classifier: PostureClassifier,
    bus: EventBus,
    metrics: PipelineMetrics,
}

impl ActivityPipeline {
    pub fn new(config: &Config) -> Self {
        info!(
            "Activity pipeline: iou>{:.2}, dist<{:.0}px, expiry={:.1}s, cooldown={:.1}s",
            config.tracker.iou_match_threshold,
            config.tracker.distance_match_threshold_px,
            config.session.session_expiry_s,
            config.alert.alert_cooldown_s
        );
        Self {
            state: TrackState::new(config),
            classifier: PostureClassifier::new(config.posture.clone()),
            bus: EventBus::new(MAX_PENDING_EVENTS),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Run one tick. State updates are kept even when the sink fails; the
    /// failure is returned after every pending event was offered to the sink.
    pub fn tick(&mut self, frame: &DetectionFrame, sink: &mut dyn EventSink) -> Result<TickOutput> {
        let started = Instant::now();
        let now = frame.timestamp_s;
        self.metrics.inc(&self.metrics.total_ticks);
        self.metrics
            .add(&self.metrics.persons_detected, frame.persons.len() as u64);

        for obj in &frame.objects {
            let (cx, cy) = obj.bbox.center();
            trace!(
                "Frame {} {} {:.2} at ({:.0},{:.0})",
                frame.frame_id,
                obj.class.as_str(),
                obj.confidence,
                cx,
                cy
            );
        }

        // 1. POSTURE + HEAD-DOWN, every person
        let chairs = frame.objects_of(ObjectClass::Chair);
        let mut head_down_seen = false;
        let mut trackable: Vec<Trackable> = Vec::with_capacity(frame.persons.len());

        for (pi, pose) in frame.persons.iter().enumerate() {
            let reading = self.classifier.classify(pose, &chairs);
            trace!(
                "Person {}: {} (score={}, knee={:.0}°)",
                pi,
                reading.status.as_str(),
                reading.sitting_score,
                reading.support_angle
            );
            if self.classifier.is_head_down(pose) {
                head_down_seen = true;
            }

            match (pose.head_position(), pose.bbox()) {
                (Some(head_pos), Some(bbox)) => trackable.push(Trackable {
                    status: reading.status,
                    bbox,
                    head_pos,
                }),
                _ => {
                    debug!("Person {} not trackable (no nose or no joints)", pi);
                    self.metrics.inc(&self.metrics.untracked_persons);
                }
            }
        }

        // 2. IDENTITY ASSIGNMENT against sessions alive at tick start
        let live = self.state.sessions.candidates();
        let bboxes: Vec<BBox> = trackable.iter().map(|t| t.bbox).collect();
        let assignments = self.state.tracker.assign(&live, &bboxes);

        // 3. SESSION UPDATE
        for a in &assignments {
            if a.is_new() {
                self.metrics.inc(&self.metrics.identities_allocated);
            }
            let person = &trackable[a.detection];
            let transition = self.state.sessions.observe(
                Observation {
                    identity: a.identity,
                    status: person.status,
                    bbox: person.bbox,
                    head_pos: person.head_pos,
                },
                now,
            );
            if let Transition::Changed { from, to } = transition {
                self.metrics.inc(&self.metrics.status_changes);
                debug!("P{} {} -> {}", a.identity, from.as_str(), to.as_str());
            }
        }

        // 4. EXPIRY + FINALIZATION
        let completed_sessions = self.state.sessions.expire(now, frame.wall_time);
        for session in &completed_sessions {
            self.bus
                .publish(PipelineEvent::SittingSessionCompleted(session.clone()));
        }
        self.metrics.add(
            &self.metrics.sitting_sessions_completed,
            completed_sessions.len() as u64,
        );

        let overlays = self.state.sessions.overlays(now);

        // 5. ALERT GATE
        let context = frame.context_classes();
        let signals = AlertSignals {
            phone_seen: frame.phone_seen(),
            head_down_seen,
            objects: &context,
        };
        let mut alerts = Vec::new();
        if let Some(alert) = self.state.debouncer.evaluate(&signals, now, frame.wall_time) {
            self.metrics.inc(&self.metrics.alerts_emitted);
            self.bus.publish(PipelineEvent::AlertRaised {
                event: alert.clone(),
                snapshot: frame.snapshot.clone(),
            });
            alerts.push(alert);
        }

        // 6. HAND EVENTS TO THE SINK
        let dispatched = self.dispatch(sink);

        self.metrics.set(
            &self.metrics.tick_time_us,
            started.elapsed().as_micros() as u64,
        );

        dispatched.with_context(|| format!("Sink failed on frame {}", frame.frame_id))?;

        Ok(TickOutput {
            frame_id: frame.frame_id,
            overlays,
            completed_sessions,
            alerts,
            tracked: assignments.len(),
            sitting: self.state.sessions.sitting_count(),
        })
    }

    /// End of an input stream: finalize every live session and forget the
    /// alert cooldown, since the next stream's clock starts over.
    pub fn finish(
        &mut self,
        wall_time: DateTime<FixedOffset>,
        sink: &mut dyn EventSink,
    ) -> Result<Vec<CompletedSittingSession>> {
        self.state.debouncer.reset();
        if self.state.sessions.is_empty() {
            debug!("No live sessions to flush");
            return Ok(Vec::new());
        }

        let completed = self.state.sessions.finish_all(wall_time);
        for session in &completed {
            self.bus
                .publish(PipelineEvent::SittingSessionCompleted(session.clone()));
        }
        self.metrics.add(
            &self.metrics.sitting_sessions_completed,
            completed.len() as u64,
        );
        self.dispatch(sink)
            .context("Sink failed while flushing sessions")?;
        Ok(completed)
    }

    /// Drain the bus into the sink. Every event is offered even after a
    /// failure; the first error is returned.
    fn dispatch(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        let mut first_error: Option<anyhow::Error> = None;

        for event in self.bus.drain() {
            let result = match &event {
                PipelineEvent::SittingSessionCompleted(session) => {
                    sink.record_sitting_session(session)
                }
                PipelineEvent::AlertRaised { event, snapshot } => {
                    sink.record_alert(event, snapshot.as_deref())
                }
            };

            if let Err(e) = result {
                self.metrics.inc(&self.metrics.sink_failures);
                warn!("Event sink rejected {}: {:#}", event_name(&event), e);
                first_error.get_or_insert(e);
            }
        }

        self.metrics
            .set(&self.metrics.events_dropped, self.bus.dropped());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop all sessions, identities, cooldown and finalization history.
    /// Unflushed sessions are discarded; call `finish` first to keep them.
    pub fn reset(&mut self) {
        info!(
            "Tracking state reset ({} identities issued, {} live sessions dropped)",
            self.state.tracker.allocated_count(),
            self.state.sessions.len()
        );
        self.state.reset();
        self.bus.drain();
    }

    pub fn current_sitting(&self) -> usize {
        self.state.sessions.sitting_count()
    }

    pub fn live_sessions(&self) -> usize {
        self.state.sessions.len()
    }

    #[cfg(test)]
    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}

fn event_name(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::SittingSessionCompleted(_) => "sitting session",
        PipelineEvent::AlertRaised { .. } => "alert",
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use crate::analysis::posture::fixtures::{seated_pose, standing_pose, two_cue_pose};
    use crate::sink::MemorySink;
    use crate::types::{AlertKind, Keypoint, ObjectBox, Pose, NUM_KEYPOINTS};
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    fn wall() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
            .unwrap()
    }

    fn frame(frame_id: u64, t: f64, persons: Vec<Pose>) -> DetectionFrame {
        let mut f = DetectionFrame::new(frame_id, t, wall());
        f.persons = persons;
        f
    }

    fn shifted(pose: &Pose, dx: f32) -> Pose {
        let keypoints = pose
            .keypoints
            .iter()
            .map(|k| {
                if k.is_observed() {
                    Keypoint::new(k.x + dx, k.y, k.score)
                } else {
                    *k
                }
            })
            .collect();
        Pose::new(keypoints)
    }

    fn phone_frame(frame_id: u64, t: f64) -> DetectionFrame {
        let mut f = frame(frame_id, t, Vec::new());
        f.objects = vec![
            ObjectBox {
                class: ObjectClass::Phone,
                bbox: BBox::new(10.0, 10.0, 30.0, 50.0),
                confidence: 0.8,
            },
            ObjectBox {
                class: ObjectClass::Laptop,
                bbox: BBox::new(50.0, 50.0, 250.0, 200.0),
                confidence: 0.7,
            },
        ];
        f.snapshot = Some(vec![1, 2, 3]);
        f
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record_sitting_session(&mut self, _: &CompletedSittingSession) -> Result<()> {
            Err(anyhow!("disk full"))
        }

        fn record_alert(&mut self, _: &AlertEvent, _: Option<&[u8]>) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn test_identity_stable_under_small_motion() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut sink = MemorySink::new();
        let base = seated_pose();

        let mut ids = Vec::new();
        for i in 0..20u64 {
            let pose = shifted(&base, 5.0 * i as f32);
            let out = pipeline
                .tick(&frame(i, i as f64 * 0.1, vec![pose]), &mut sink)
                .unwrap();
            assert_eq!(out.tracked, 1);
            ids.push(out.overlays[0].identity);
        }
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(pipeline.state().tracker.allocated_count(), 1);
    }

    #[test]
    fn test_status_flips_on_fourth_tick() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut sink = MemorySink::new();

        for (i, t) in [0.0, 0.5, 1.0].into_iter().enumerate() {
            let out = pipeline
                .tick(&frame(i as u64, t, vec![two_cue_pose()]), &mut sink)
                .unwrap();
            assert_eq!(out.overlays[0].status, PersonStatus::Sitting);
        }
        assert_eq!(pipeline.current_sitting(), 1);

        let out = pipeline
            .tick(&frame(3, 1.5, vec![standing_pose()]), &mut sink)
            .unwrap();
        let entry = &out.overlays[0];
        assert_eq!(entry.status, PersonStatus::Standing);
        assert_eq!(entry.elapsed_seconds, 0);

        let record = pipeline.state().sessions.get(entry.identity).unwrap();
        assert_eq!(record.status_since, 1.5);
        assert_eq!(out.sitting, 0);
        assert_eq!(pipeline.current_sitting(), 0);
        assert_eq!(pipeline.metrics().status_changes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_eight_second_session_emitted_once() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut sink = MemorySink::new();

        let mut frame_id = 0;
        let mut t = 0.0;
        while t <= 8.0 {
            pipeline
                .tick(&frame(frame_id, t, vec![seated_pose()]), &mut sink)
                .unwrap();
            frame_id += 1;
            t += 0.5;
        }

        let mut completed = Vec::new();
        for t in [8.5, 9.0, 9.5, 10.0, 12.0] {
            let out = pipeline.tick(&frame(frame_id, t, Vec::new()), &mut sink).unwrap();
            completed.extend(out.completed_sessions);
            frame_id += 1;
        }

        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].duration_seconds, 8);
        assert_eq!(sink.session_count(), 1);
        assert_eq!(sink.alert_count(), 0);

        // Nothing left to flush at end of stream
        assert!(pipeline.finish(wall(), &mut sink).unwrap().is_empty());
        assert_eq!(sink.session_count(), 1);
    }

    #[test]
    fn test_alerts_debounced_across_ticks() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut sink = MemorySink::new();

        let first = pipeline.tick(&phone_frame(0, 10.0), &mut sink).unwrap();
        let second = pipeline.tick(&phone_frame(1, 11.0), &mut sink).unwrap();
        let third = pipeline.tick(&phone_frame(2, 14.0), &mut sink).unwrap();

        assert_eq!(first.alerts.len(), 1);
        assert!(second.alerts.is_empty());
        assert_eq!(third.alerts.len(), 1);
        assert_eq!(sink.alert_count(), 2);

        let alert = &first.alerts[0];
        assert_eq!(alert.kind, AlertKind::PhoneUsage);
        assert_eq!(alert.description, "Person detected using phone near Laptop");
        assert_eq!(pipeline.metrics().alerts_emitted.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unobserved_joints_do_not_fault() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut sink = MemorySink::new();
        let blank = Pose::new(vec![Keypoint::new(0.0, 0.0, 0.1); NUM_KEYPOINTS]);
        let truncated = Pose::new(vec![Keypoint::new(100.0, 100.0, 0.9); 5]);

        let out = pipeline
            .tick(&frame(0, 0.0, vec![blank, truncated]), &mut sink)
            .unwrap();
        // The truncated set still has a nose and a box: tracked as Standing
        assert_eq!(out.tracked, 1);
        assert_eq!(out.overlays[0].status, PersonStatus::Standing);
        assert_eq!(
            pipeline.metrics().untracked_persons.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_sink_failure_surfaces_but_keeps_state() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut failing = FailingSink;

        let mut f = phone_frame(0, 0.0);
        f.persons = vec![seated_pose()];
        assert!(pipeline.tick(&f, &mut failing).is_err());

        assert_eq!(pipeline.state().sessions.len(), 1);
        assert_eq!(pipeline.state().debouncer.last_emitted(), Some(0.0));
        assert_eq!(pipeline.metrics().sink_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_finish_flushes_sitting_and_reset_clears() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut sink = MemorySink::new();
        for (i, t) in [0.0, 3.0, 6.0].into_iter().enumerate() {
            pipeline
                .tick(&frame(i as u64, t, vec![seated_pose()]), &mut sink)
                .unwrap();
        }

        let flushed = pipeline.finish(wall(), &mut sink).unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].duration_seconds, 6);
        assert_eq!(sink.session_count(), 1);

        pipeline.tick(&phone_frame(3, 7.0), &mut sink).unwrap();
        pipeline.reset();
        assert!(pipeline.state().sessions.is_empty());
        assert_eq!(pipeline.state().debouncer.last_emitted(), None);
        assert_eq!(pipeline.state().tracker.allocated_count(), 0);
        assert_eq!(pipeline.current_sitting(), 0);
    }

    #[test]
    fn test_finish_opens_fresh_alert_window_for_next_stream() {
        let mut pipeline = ActivityPipeline::new(&Config::default());
        let mut sink = MemorySink::new();

        let late = pipeline.tick(&phone_frame(0, 500.0), &mut sink).unwrap();
        assert_eq!(late.alerts.len(), 1);
        pipeline.finish(wall(), &mut sink).unwrap();

        // Next stream restarts its clock at zero
        let mut alerts = 0;
        for i in 0..10u64 {
            let out = pipeline.tick(&phone_frame(i + 1, i as f64), &mut sink).unwrap();
            alerts += out.alerts.len();
        }
        // t = 0, 4 and 8
        assert_eq!(alerts, 3);
        assert_eq!(sink.alert_count(), 4);
    }
}
