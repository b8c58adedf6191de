//! Ordered event queue.
//!
//! Events are kept sorted by `(scheduled_time, -priority, created_at,
//! arrival_seq)`. `arrival_seq` is a monotonic counter assigned on
//! insertion, so events that tie on everything else keep their insertion
//! order. The queue never executes anything; it only orders, finds and
//! prunes.
//!
//! Terminal events stay queued until pruned. The queue tracks a settled
//! prefix of terminal entries so that due-event scans start at the first
//! event that can still run instead of at the head of the history.

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use envsim_core::{EventId, EventStatus, SimError};

use crate::event::SimulatorEvent;

type SortKey = (DateTime<Utc>, Reverse<i32>, DateTime<Utc>, u64);

#[derive(Clone, Debug)]
struct QueueEntry {
    event: SimulatorEvent,
    arrival_seq: u64,
}

impl QueueEntry {
    fn key(&self) -> SortKey {
        (
            self.event.scheduled_time,
            Reverse(self.event.priority),
            self.event.created_at,
            self.arrival_seq,
        )
    }
}

/// Per-status event counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Waiting for their time.
    pub pending: usize,
    /// Mid-execution; only observable from inside a mutation.
    pub executing: usize,
    /// Applied successfully.
    pub executed: usize,
    /// Mutation failed.
    pub failed: usize,
    /// Jumped past.
    pub skipped: usize,
    /// Withdrawn.
    pub cancelled: usize,
}

impl StatusCounts {
    fn record(&mut self, status: EventStatus) {
        let slot = match status {
            EventStatus::Pending => &mut self.pending,
            EventStatus::Executing => &mut self.executing,
            EventStatus::Executed => &mut self.executed,
            EventStatus::Failed => &mut self.failed,
            EventStatus::Skipped => &mut self.skipped,
            EventStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    /// Count for one status.
    pub fn get(&self, status: EventStatus) -> usize {
        match status {
            EventStatus::Pending => self.pending,
            EventStatus::Executing => self.executing,
            EventStatus::Executed => self.executed,
            EventStatus::Failed => self.failed,
            EventStatus::Skipped => self.skipped,
            EventStatus::Cancelled => self.cancelled,
        }
    }
}

/// Overview of the queue's contents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// Number of events held.
    pub total: usize,
    /// Events per status.
    pub counts: StatusCounts,
    /// Scheduled time of the earliest pending event.
    pub next_event_time: Option<DateTime<Utc>>,
}

/// Conjunctive query over queued events. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    /// Only events with this status.
    pub status: Option<EventStatus>,
    /// Only events targeting this modality.
    pub modality: Option<String>,
    /// Only events from this originator.
    pub agent_id: Option<String>,
    /// Only events scheduled at or after this time.
    pub start: Option<DateTime<Utc>>,
    /// Only events scheduled at or before this time.
    pub end: Option<DateTime<Utc>>,
    /// At most this many results, in queue order.
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &SimulatorEvent) -> bool {
        self.status.map_or(true, |s| event.status() == s)
            && self
                .modality
                .as_deref()
                .map_or(true, |m| event.modality == m)
            && self
                .agent_id
                .as_deref()
                .map_or(true, |a| event.agent_id.as_deref() == Some(a))
    }
}

/// Sorted collection of scheduled events.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    entries: Vec<QueueEntry>,
    ids: HashSet<EventId>,
    next_arrival_seq: u64,
    /// Every entry before this index is terminal. Terminal events never
    /// change status again, so the prefix only shrinks when an insert or
    /// removal lands inside it.
    settled: usize,
}

impl EventQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one event at its sorted position.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateId`] if an event with the same ID is queued.
    pub fn add_event(&mut self, event: SimulatorEvent) -> Result<(), SimError> {
        if self.ids.contains(&event.id) {
            return Err(SimError::DuplicateId { id: event.id });
        }
        let entry = self.wrap(event);
        let key = entry.key();
        let pos = self.entries.partition_point(|e| e.key() < key);
        self.ids.insert(entry.event.id);
        self.entries.insert(pos, entry);
        self.settled = self.settled.min(pos);
        Ok(())
    }

    /// Insert a batch, all or nothing. Returns the number inserted.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateId`] if any ID is already queued or appears
    /// twice in the batch. Nothing is inserted in that case.
    pub fn add_events(&mut self, events: Vec<SimulatorEvent>) -> Result<usize, SimError> {
        let mut batch = HashSet::with_capacity(events.len());
        for event in &events {
            if self.ids.contains(&event.id) || !batch.insert(event.id) {
                return Err(SimError::DuplicateId { id: event.id });
            }
        }
        let count = events.len();
        self.entries.reserve(count);
        for event in events {
            let entry = self.wrap(event);
            self.entries.push(entry);
        }
        self.ids.extend(batch);
        self.entries.sort_by_key(QueueEntry::key);
        self.settled = 0;
        Ok(count)
    }

    fn wrap(&mut self, event: SimulatorEvent) -> QueueEntry {
        let arrival_seq = self.next_arrival_seq;
        self.next_arrival_seq += 1;
        QueueEntry { event, arrival_seq }
    }

    /// Extend the settled prefix over newly terminal entries.
    fn settle(&mut self) {
        while self
            .entries
            .get(self.settled)
            .is_some_and(|e| e.event.status().is_terminal())
        {
            self.settled += 1;
        }
    }

    /// Entries from the first one that may still be pending.
    fn unsettled(&self) -> impl Iterator<Item = &SimulatorEvent> {
        self.entries.iter().skip(self.settled).map(|e| &e.event)
    }

    /// Number of leading entries scheduled at or before `t`.
    fn due_end(&self, t: DateTime<Utc>) -> usize {
        self.entries.partition_point(|e| e.event.scheduled_time <= t)
    }

    /// Pending events scheduled at or before `t`, in execution order.
    /// Statuses are not changed.
    pub fn get_due_events(&self, t: DateTime<Utc>) -> Vec<&SimulatorEvent> {
        let end = self.due_end(t);
        self.entries[..end]
            .iter()
            .skip(self.settled)
            .map(|e| &e.event)
            .filter(|e| e.status() == EventStatus::Pending)
            .collect()
    }

    /// Positions of the events [`get_due_events`](Self::get_due_events)
    /// would return. Valid until the queue is next inserted into or pruned.
    pub(crate) fn due_positions(&mut self, t: DateTime<Utc>) -> SmallVec<[usize; 8]> {
        self.settle();
        self.pending_positions(self.settled, self.due_end(t))
    }

    /// Positions of pending events scheduled strictly before `t`.
    pub(crate) fn pending_positions_before(&mut self, t: DateTime<Utc>) -> SmallVec<[usize; 8]> {
        self.settle();
        let end = self.entries.partition_point(|e| e.event.scheduled_time < t);
        self.pending_positions(self.settled, end)
    }

    fn pending_positions(&self, start: usize, end: usize) -> SmallVec<[usize; 8]> {
        (start..end)
            .filter(|&i| self.entries[i].event.status() == EventStatus::Pending)
            .collect()
    }

    pub(crate) fn event_at(&self, pos: usize) -> Option<&SimulatorEvent> {
        self.entries.get(pos).map(|e| &e.event)
    }

    pub(crate) fn event_at_mut(&mut self, pos: usize) -> Option<&mut SimulatorEvent> {
        self.entries.get_mut(pos).map(|e| &mut e.event)
    }

    /// The earliest pending event, without removing it.
    pub fn peek_next(&self) -> Option<&SimulatorEvent> {
        self.unsettled().find(|e| e.status() == EventStatus::Pending)
    }

    /// Every event with `status`, in queue order.
    pub fn get_events_by_status(&self, status: EventStatus) -> Vec<&SimulatorEvent> {
        self.iter().filter(|e| e.status() == status).collect()
    }

    /// Events scheduled within `[start, end]`, optionally of one status.
    pub fn get_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: Option<EventStatus>,
    ) -> Vec<&SimulatorEvent> {
        let (lo, hi) = self.range_bounds(Some(start), Some(end));
        self.entries[lo..hi]
            .iter()
            .map(|e| &e.event)
            .filter(|e| status.map_or(true, |s| e.status() == s))
            .collect()
    }

    fn range_bounds(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> (usize, usize) {
        let lo = start.map_or(0, |s| {
            self.entries.partition_point(|e| e.event.scheduled_time < s)
        });
        let hi = end.map_or(self.entries.len(), |t| self.due_end(t));
        (lo, hi.max(lo))
    }

    /// Events matching every set field of `filter`, in queue order.
    pub fn query(&self, filter: &EventFilter) -> Vec<&SimulatorEvent> {
        let (lo, hi) = self.range_bounds(filter.start, filter.end);
        let matching = self.entries[lo..hi]
            .iter()
            .map(|e| &e.event)
            .filter(|e| filter.matches(e));
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Look up an event by ID.
    pub fn get(&self, id: EventId) -> Option<&SimulatorEvent> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.iter().find(|e| e.id == id)
    }

    /// Mutable lookup by ID. Crate-private: changing the ordering fields
    /// in place would break the sort invariant.
    pub(crate) fn get_mut(&mut self, id: EventId) -> Option<&mut SimulatorEvent> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.entries
            .iter_mut()
            .map(|e| &mut e.event)
            .find(|e| e.id == id)
    }

    /// Remove and return an event.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] if no event has this ID.
    pub fn remove_event(&mut self, id: EventId) -> Result<SimulatorEvent, SimError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.event.id == id)
            .ok_or_else(|| SimError::event_not_found(id))?;
        self.ids.remove(&id);
        if pos < self.settled {
            self.settled -= 1;
        }
        Ok(self.entries.remove(pos).event)
    }

    /// Drop terminal events, optionally only those scheduled strictly
    /// before `before`. Returns how many were dropped.
    pub fn clear_executed(&mut self, before: Option<DateTime<Utc>>) -> usize {
        let initial = self.entries.len();
        let ids = &mut self.ids;
        self.entries.retain(|e| {
            let prune = e.event.status().is_terminal()
                && before.map_or(true, |b| e.event.scheduled_time < b);
            if prune {
                ids.remove(&e.event.id);
            }
            !prune
        });
        self.settled = 0;
        initial - self.entries.len()
    }

    /// Drop every event. The arrival counter keeps counting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.settled = 0;
    }

    /// Number of events held, in any status.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no events.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pending events.
    pub fn pending_count(&self) -> usize {
        self.unsettled()
            .filter(|e| e.status() == EventStatus::Pending)
            .count()
    }

    /// Events in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &SimulatorEvent> {
        self.entries.iter().map(|e| &e.event)
    }

    /// Totals per status plus the next pending time.
    pub fn summary(&self) -> QueueSummary {
        let mut counts = StatusCounts::default();
        for event in self.iter() {
            counts.record(event.status());
        }
        QueueSummary {
            total: self.entries.len(),
            counts,
            next_event_time: self.peek_next().map(|e| e.scheduled_time),
        }
    }
}
