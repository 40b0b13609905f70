// src/analysis/mod.rs
//
// Tracking and activity modules.
//
// Signal flow per tick:
//   Pose keypoints → posture (status, head-down) ──────────────┐
//   Pose bboxes    → identity_tracker → session_store ─────────┼→ overlays + CompletedSittingSession
//   Object boxes   → alert_debouncer (phone / head-down) ──────┘→ AlertEvent
//
// Orchestrated by pipeline::orchestrator::ActivityPipeline.

pub mod alert_debouncer;
pub mod identity_tracker;
pub mod posture;
pub mod session_store;

// Re-exports for ergonomic access from the pipeline
pub use alert_debouncer::{AlertDebouncer, AlertSignals};
pub use identity_tracker::IdentityTracker;
pub use posture::PostureClassifier;
pub use session_store::{Observation, SessionStore, Transition};
