// src/pipeline/event_bus.rs
//
// Events produced during a tick queue here and are drained to the sink
// once the tick's state updates are done.

use crate::types::{AlertEvent, CompletedSittingSession};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    SittingSessionCompleted(CompletedSittingSession),

    AlertRaised {
        event: AlertEvent,
        snapshot: Option<Vec<u8>>,
    },
}

/// Bounded FIFO of events awaiting the sink. When full, the oldest event
/// is discarded so a stalled sink cannot grow memory without bound.
pub struct EventBus {
    queue: VecDeque<PipelineEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.queue.len() == self.capacity {
            if let Some(lost) = self.queue.pop_front() {
                self.dropped += 1;
                warn!("Event queue at capacity ({}), discarding {:?}", self.capacity, lost);
            }
        }
        self.queue.push_back(event);
    }

    /// Take everything queued, in publish order.
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        std::mem::take(&mut self.queue).into()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
