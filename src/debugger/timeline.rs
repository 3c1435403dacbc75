//! Chronological record of the session's state snapshots.
//!
//! Each refresh appends the freshly built snapshot; the active index lets
//! the IDE-facing layer inspect earlier machine states without another
//! round-trip to the device.

use std::sync::Arc;

use crate::debugger::context::Context;

#[derive(Debug, Default)]
pub struct DebuggingTimeline {
    snapshots: Vec<Arc<Context>>,
    active: Option<usize>,
}

impl DebuggingTimeline {
    pub fn new() -> DebuggingTimeline {
        DebuggingTimeline::default()
    }

    pub fn append(&mut self, context: Arc<Context>) {
        self.snapshots.push(context);
        self.active = Some(self.snapshots.len() - 1);
    }

    pub fn active_state(&self) -> Option<&Arc<Context>> {
        self.active.and_then(|idx| self.snapshots.get(idx))
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn start_state(&self) -> Option<&Arc<Context>> {
        self.snapshots.first()
    }

    pub fn last_state(&self) -> Option<&Arc<Context>> {
        self.snapshots.last()
    }

    pub fn state_at(&self, index: usize) -> Option<&Arc<Context>> {
        self.snapshots.get(index)
    }

    /// Moves the active state one snapshot forward. `None` when already at
    /// the present.
    pub fn advance(&mut self) -> Option<&Arc<Context>> {
        let next = self.active.map_or(0, |idx| idx + 1);
        if next >= self.snapshots.len() {
            return None;
        }
        self.active = Some(next);
        self.snapshots.get(next)
    }

    /// Moves the active state one snapshot back. `None` at the start.
    pub fn go_back(&mut self) -> Option<&Arc<Context>> {
        let idx = self.active?;
        if idx == 0 {
            return None;
        }
        self.active = Some(idx - 1);
        self.snapshots.get(idx - 1)
    }

    pub fn advance_to_present(&mut self) {
        if !self.snapshots.is_empty() {
            self.active = Some(self.snapshots.len() - 1);
        }
    }

    pub fn is_active_state_present(&self) -> bool {
        match self.active {
            Some(idx) => idx + 1 == self.snapshots.len(),
            None => self.snapshots.is_empty(),
        }
    }

    /// Drops every snapshot after the active one, making it the new
    /// present.
    pub fn make_active_state_new_present(&mut self) {
        if let Some(idx) = self.active {
            self.snapshots.truncate(idx + 1);
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.active = None;
    }
}
