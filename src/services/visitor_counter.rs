//! Visitor count state
//!
//! The only place the count changes. An exit at zero is absorbed rather than
//! driving the count negative.

use crate::domain::types::{CrossingEvent, Direction};
use tracing::{debug, info};

/// Result of applying one crossing to the count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountChange {
    Incremented,
    Decremented,
    /// Exit seen with the count already at zero
    Underflow,
}

#[derive(Debug, Default)]
pub struct VisitorCounter {
    count: u32,
    /// Entries since the last reset
    entries: u64,
    /// Exits since the last reset, including absorbed ones
    exits: u64,
}

impl VisitorCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &CrossingEvent) -> CountChange {
        match event.direction {
            Direction::Entry => {
                self.entries += 1;
                self.count = self.count.saturating_add(1);
                debug!(count = %self.count, "count_incremented");
                CountChange::Incremented
            }
            Direction::Exit => {
                self.exits += 1;
                if self.count == 0 {
                    debug!(ts = %event.timestamp, "count_underflow_absorbed");
                    return CountChange::Underflow;
                }
                self.count -= 1;
                debug!(count = %self.count, "count_decremented");
                CountChange::Decremented
            }
        }
    }

    /// Clear the count and session totals unconditionally
    pub fn reset(&mut self) {
        info!(
            previous_count = %self.count,
            entries = %self.entries,
            exits = %self.exits,
            "counter_reset"
        );
        self.count = 0;
        self.entries = 0;
        self.exits = 0;
    }

    pub fn current(&self) -> u32 {
        self.count
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn exits(&self) -> u64 {
        self.exits
    }
}
