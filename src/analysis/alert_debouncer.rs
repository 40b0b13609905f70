// src/analysis/alert_debouncer.rs
//
// Single global cooldown gate for phone-use alerts. The cooldown is shared
// by everyone in frame: a second person tripping the signal inside the
// window does not produce another alert.

use crate::types::{AlertConfig, AlertEvent, AlertKind, ObjectClass};
use chrono::{DateTime, FixedOffset};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-tick trigger inputs.
#[derive(Debug, Clone, Copy)]
pub struct AlertSignals<'a> {
    pub phone_seen: bool,
    pub head_down_seen: bool,
    /// Co-detected classes in detection order
    pub objects: &'a [ObjectClass],
}

impl AlertSignals<'_> {
    pub fn triggered(&self) -> bool {
        self.phone_seen || self.head_down_seen
    }
}

pub struct AlertDebouncer {
    config: AlertConfig,
    last_emitted: Option<f64>,
}

impl AlertDebouncer {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            last_emitted: None,
        }
    }

    pub fn evaluate(
        &mut self,
        signals: &AlertSignals,
        now: f64,
        wall_time: DateTime<FixedOffset>,
    ) -> Option<AlertEvent> {
        if !signals.triggered() {
            return None;
        }

        // A clock that went backwards (new input stream) opens a fresh window
        if let Some(last) = self.last_emitted.filter(|last| now >= *last) {
            if now - last <= self.config.alert_cooldown_s {
                debug!("Alert suppressed ({:.1}s since last)", now - last);
                return None;
            }
        }

        let kind = if signals.phone_seen {
            AlertKind::PhoneUsage
        } else {
            AlertKind::SuspectedPhoneUse
        };
        let objects: Vec<ObjectClass> = dedup_context(signals.objects);
        let description = describe(kind, &objects);

        self.last_emitted = Some(now);
        warn!("{}: {}", kind.as_str(), description);

        Some(AlertEvent {
            event_id: Uuid::new_v4(),
            kind,
            occurred_at: wall_time,
            description,
            objects,
        })
    }

    pub fn last_emitted(&self) -> Option<f64> {
        self.last_emitted
    }

    pub fn reset(&mut self) {
        self.last_emitted = None;
    }
}

fn dedup_context(objects: &[ObjectClass]) -> Vec<ObjectClass> {
    let mut out: Vec<ObjectClass> = Vec::new();
    for class in objects {
        if *class != ObjectClass::Phone && !out.contains(class) {
            out.push(*class);
        }
    }
    out
}

/// Human-readable alert text, listing nearby objects other than the phone.
pub fn describe(kind: AlertKind, objects: &[ObjectClass]) -> String {
    let mut description = match kind {
        AlertKind::PhoneUsage => "Person detected using phone".to_string(),
        AlertKind::SuspectedPhoneUse => {
            "Head down pose detected (Suspected phone use)".to_string()
        }
    };

    let names: Vec<&str> = objects
        .iter()
        .filter(|c| **c != ObjectClass::Phone)
        .map(|c| c.as_str())
        .collect();
    if !names.is_empty() {
        description.push_str(" near ");
        description.push_str(&names.join(", "));
    }
    description
}
