//! Progress Cursor
//!
//! Tracks how far a run has advanced through its flattened plan and
//! publishes snapshots to the run's subscribers.

use log::debug;

use crate::monitoring::{ProgressBroadcaster, ProgressEvent, ProgressSnapshot};
use crate::pipeline::StepInfo;

/// Cursor over a run's flattened plan.
///
/// The cursor only moves forward. A foreach that iterates more often than
/// it has plan slots stops at the end of its own slots, so steps after it
/// stay `running` until they start. Snapshots also clamp the cursor to the
/// plan length.
pub struct ProgressTracker<'b> {
    run_id: String,
    plan: Vec<StepInfo>,
    cursor: usize,
    broadcaster: &'b ProgressBroadcaster,
}

impl<'b> ProgressTracker<'b> {
    pub fn new(run_id: String, plan: Vec<StepInfo>, broadcaster: &'b ProgressBroadcaster) -> Self {
        Self {
            run_id,
            plan,
            cursor: 0,
            broadcaster,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn plan_len(&self) -> usize {
        self.plan.len()
    }

    pub fn advance(&mut self, slots: usize) {
        self.cursor += slots;
    }

    /// Advances by `slots` without passing `limit`.
    pub fn advance_within(&mut self, slots: usize, limit: usize) {
        self.cursor = (self.cursor + slots).min(limit).max(self.cursor);
    }

    /// Moves the cursor to `position`; never moves it backwards.
    pub fn set_cursor(&mut self, position: usize) {
        self.cursor = self.cursor.max(position);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::at(&self.plan, self.cursor)
    }

    /// Publishes the current snapshot, returning how many observers got it.
    pub fn publish(&self) -> usize {
        let snapshot = self.snapshot();
        debug!(
            "Run '{}': progress {}/{}",
            self.run_id,
            snapshot.executed.len(),
            self.plan.len()
        );
        self.broadcaster
            .publish_event(&self.run_id, &ProgressEvent::Progress(snapshot))
    }
}
