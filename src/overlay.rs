// src/overlay.rs
//
// Renderer-facing view of the live sessions. The renderer only reads these;
// nothing flows back into tracking state.

use crate::types::{PersonStatus, TrackId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayEntry {
    pub identity: TrackId,
    pub head_position: (f32, f32),
    pub status: PersonStatus,
    /// Whole seconds in the current status
    pub elapsed_seconds: u64,
}

impl OverlayEntry {
    pub fn status_label(&self) -> &'static str {
        self.status.label()
    }

    pub fn timer_text(&self) -> String {
        format_timer(self.elapsed_seconds)
    }
}

/// "1m 5s" from one minute up, "42s" below.
pub fn format_timer(elapsed_seconds: u64) -> String {
    let minutes = elapsed_seconds / 60;
    let seconds = elapsed_seconds % 60;
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
