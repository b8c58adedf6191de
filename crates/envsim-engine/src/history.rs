//! Bounded undo/redo history for executed events.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::Value;

use envsim_core::{EventId, UndoRecord};

/// One reversible mutation: the record that reverts it and the input
/// that re-applies it.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// Event whose execution produced the mutation.
    pub event_id: EventId,
    /// Target domain object.
    pub modality: String,
    /// Payload that was applied.
    pub input: Value,
    /// Virtual time the payload was applied at.
    pub applied_at: DateTime<Utc>,
    /// Record that reverts the mutation.
    pub record: UndoRecord,
}

/// Undo and redo stacks.
///
/// The undo stack holds at most `capacity` entries; the oldest is evicted
/// first. Recording a new mutation clears the redo stack.
#[derive(Clone, Debug)]
pub struct UndoHistory {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    capacity: usize,
}

impl UndoHistory {
    /// Empty history keeping at most `capacity` undo entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            undo: VecDeque::with_capacity(capacity.min(64)),
            redo: Vec::new(),
            capacity,
        }
    }

    /// Record a fresh mutation. Invalidates every redo entry.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.redo.clear();
        self.push_undo(entry);
    }

    /// Push onto the undo stack, keeping the redo stack.
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(entry);
    }

    /// Take the most recent undo entry.
    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    /// Push onto the redo stack.
    pub fn push_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    /// Take the most recently undone entry.
    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// Drop both stacks.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Entries available to undo.
    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Entries available to redo.
    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}
