//! The simulation engine: sole coordinator of clock, queue, environment,
//! undo history and the auto-advance loop.
//!
//! # Locking
//!
//! All engine state sits behind one `parking_lot::Mutex` in a shared
//! core that also implements [`Ticker`] for the background loop. Every
//! operation, read-only or not, takes that lock, so callers never observe
//! a half-applied batch.
//!
//! Lifecycle operations (`start`, `stop`, `reset`) additionally hold a
//! separate driver lock while they spawn or join the loop thread. The
//! tick path never takes the driver lock, and `stop` never holds the
//! state lock while joining, so an in-flight tick always completes.
//! Lock order is driver, then state.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use envsim_core::{Environment, EnvironmentSnapshot, EventId, EventStatus, SimError, TimeSnapshot};

use crate::config::{ConfigError, EngineConfig};
use crate::driver::{LoopReport, SimulationLoop, Ticker};
use crate::event::{EventOutcome, SimulatorEvent};
use crate::history::{HistoryEntry, UndoHistory};
use crate::metrics::EngineMetrics;
use crate::queue::{EventFilter, EventQueue, QueueSummary, StatusCounts};

const SKIP_REASON: &str = "time jumped past scheduled time";

// ── Result types ───────────────────────────────────────────────────

/// Lifecycle state. `Running` carries an orthogonal paused flag on the
/// clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Time-control operations are rejected.
    Stopped,
    /// Time can move.
    Running,
}

/// Returned by [`SimulationEngine::start`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartSummary {
    /// Clock state after starting.
    pub time: TimeSnapshot,
    /// Pending events at start.
    pub pending_events: usize,
}

/// Returned by [`SimulationEngine::stop`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Virtual time when the engine stopped.
    pub final_time: DateTime<Utc>,
    /// Queue contents per status.
    pub counts: StatusCounts,
    /// Ticks since construction or the last reset.
    pub ticks: u64,
    /// Background loop report, if auto-advance was on.
    pub loop_report: Option<LoopReport>,
}

/// Returned by [`SimulationEngine::reset`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResetSummary {
    /// Clock state after the reset.
    pub time: TimeSnapshot,
    /// Terminal events pruned from the queue.
    pub cleared_events: usize,
    /// Pending events kept.
    pub pending_events: usize,
}

/// Returned by [`SimulationEngine::advance_time`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvanceResult {
    /// Virtual time before the call.
    pub previous_time: DateTime<Utc>,
    /// Virtual time after the call.
    pub current_time: DateTime<Utc>,
    /// Events run by the call, in execution order.
    pub executed: Vec<EventOutcome>,
}

/// Returned by [`SimulationEngine::set_time`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetTimeResult {
    /// Virtual time before the jump.
    pub previous_time: DateTime<Utc>,
    /// Virtual time after the jump.
    pub current_time: DateTime<Utc>,
    /// Events run by the call, in execution order.
    pub executed: Vec<EventOutcome>,
    /// Events marked skipped by the jump.
    pub skipped: Vec<EventId>,
}

/// Returned by [`SimulationEngine::skip_to_next_event`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SkipResult {
    /// Nothing is pending; time was left alone.
    NoPendingEvents {
        /// Unchanged virtual time.
        current_time: DateTime<Utc>,
    },
    /// Time jumped to the next pending event.
    Advanced {
        /// Virtual time before the jump.
        previous_time: DateTime<Utc>,
        /// Virtual time after the jump.
        current_time: DateTime<Utc>,
        /// Events run at the new time.
        executed: Vec<EventOutcome>,
    },
}

/// Returned by [`SimulationEngine::tick`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    /// Virtual time after the tick.
    pub current_time: DateTime<Utc>,
    /// Virtual time added by the tick, in nanoseconds.
    pub advanced_ns: i64,
    /// Events run by the tick.
    pub executed: Vec<EventOutcome>,
}

/// Returned by [`SimulationEngine::undo`] and [`SimulationEngine::redo`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryOutcome {
    /// Event whose mutation was reverted or re-applied.
    pub event_id: EventId,
    /// Target domain object.
    pub modality: String,
    /// Target version after the operation.
    pub version: u64,
    /// Entries left to undo.
    pub undo_depth: usize,
    /// Entries left to redo.
    pub redo_depth: usize,
}

/// Full serializable view of a running simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    /// Lifecycle state.
    pub status: EngineStatus,
    /// Clock and domain state.
    #[serde(flatten)]
    pub environment: EnvironmentSnapshot,
    /// Queue overview.
    pub queue: QueueSummary,
}

// ── EngineState ────────────────────────────────────────────────────

struct EngineState {
    status: EngineStatus,
    environment: Environment,
    initial: Environment,
    queue: EventQueue,
    history: UndoHistory,
    metrics: EngineMetrics,
}

impl EngineState {
    fn ensure_running(&self) -> Result<(), SimError> {
        match self.status {
            EngineStatus::Running => Ok(()),
            EngineStatus::Stopped => Err(SimError::NotRunning),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.environment.now()
    }

    /// Execute the event at `pos` and record its effects. `None` if the
    /// position is stale or the event is no longer pending.
    fn execute_at(&mut self, pos: usize) -> Option<EventOutcome> {
        let event = self.queue.event_at_mut(pos)?;
        match event.execute(&mut self.environment) {
            Ok(Some(record)) => {
                self.history.record(HistoryEntry {
                    event_id: event.id,
                    modality: event.modality.clone(),
                    input: event.data.clone(),
                    applied_at: self.environment.now(),
                    record,
                });
                self.metrics.events_executed += 1;
            }
            Ok(None) => self.metrics.events_failed += 1,
            Err(e) => {
                warn!(error = %e, "due event was not executable");
                return None;
            }
        }
        Some(event.outcome())
    }

    /// The single path by which due events run.
    fn execute_due_events(&mut self) -> Vec<EventOutcome> {
        let now = self.now();
        let positions = self.queue.due_positions(now);
        positions
            .into_iter()
            .filter_map(|pos| self.execute_at(pos))
            .collect()
    }

    fn advance_time(&mut self, delta: TimeDelta) -> Result<AdvanceResult, SimError> {
        self.ensure_running()?;
        if delta <= TimeDelta::zero() {
            return Err(SimError::invalid(format!(
                "advance delta must be positive, got {delta}"
            )));
        }
        let previous_time = self.now();
        let target = previous_time
            .checked_add_signed(delta)
            .ok_or_else(|| SimError::invalid("virtual time out of range"))?;
        self.environment.time_mut().set_time(target)?;
        let executed = self.execute_due_events();
        debug!(from = %previous_time, to = %target, executed = executed.len(), "time advanced");
        Ok(AdvanceResult {
            previous_time,
            current_time: target,
            executed,
        })
    }

    fn set_time(
        &mut self,
        new_time: DateTime<Utc>,
        execute_skipped: bool,
    ) -> Result<SetTimeResult, SimError> {
        self.ensure_running()?;
        let previous_time = self.now();
        if new_time < previous_time {
            return Err(SimError::invalid(format!(
                "cannot move time backward from {previous_time} to {new_time}"
            )));
        }

        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        for pos in self.queue.pending_positions_before(new_time) {
            let Some(event) = self.queue.event_at(pos) else {
                continue;
            };
            let scheduled = event.scheduled_time;
            if execute_skipped {
                if scheduled > self.now() {
                    self.environment.time_mut().set_time(scheduled)?;
                }
                executed.extend(self.execute_at(pos));
            } else if scheduled > previous_time {
                // Overdue events (at or before the old time) stay due and
                // run after the jump.
                if let Some(event) = self.queue.event_at_mut(pos) {
                    event.skip(SKIP_REASON)?;
                    skipped.push(event.id);
                    self.metrics.events_skipped += 1;
                }
            }
        }

        self.environment.time_mut().set_time(new_time)?;
        executed.extend(self.execute_due_events());
        debug!(
            from = %previous_time,
            to = %new_time,
            executed = executed.len(),
            skipped = skipped.len(),
            "time set"
        );
        Ok(SetTimeResult {
            previous_time,
            current_time: new_time,
            executed,
            skipped,
        })
    }

    fn skip_to_next_event(&mut self) -> Result<SkipResult, SimError> {
        self.ensure_running()?;
        let previous_time = self.now();
        let Some(next) = self.queue.peek_next().map(|e| e.scheduled_time) else {
            return Ok(SkipResult::NoPendingEvents {
                current_time: previous_time,
            });
        };
        let target = next.max(previous_time);
        self.environment.time_mut().set_time(target)?;
        let executed = self.execute_due_events();
        debug!(from = %previous_time, to = %target, executed = executed.len(), "skipped to next event");
        Ok(SkipResult::Advanced {
            previous_time,
            current_time: target,
            executed,
        })
    }

    fn tick_at(&mut self, wall_now: DateTime<Utc>) -> Result<TickSummary, SimError> {
        self.ensure_running()?;
        let started = Instant::now();
        let time = self.environment.time();
        let delta = time.calculate_advancement(time.wall_elapsed(wall_now));
        if !time.is_paused() {
            self.environment.time_mut().advance_at(delta, wall_now)?;
        }
        let executed = self.execute_due_events();
        self.metrics.ticks += 1;
        self.metrics.last_tick_us = started.elapsed().as_micros() as u64;
        Ok(TickSummary {
            current_time: self.now(),
            advanced_ns: delta.num_nanoseconds().unwrap_or(i64::MAX),
            executed,
        })
    }

    fn undo(&mut self) -> Result<HistoryOutcome, SimError> {
        let entry = self
            .history
            .pop_undo()
            .ok_or_else(|| SimError::invalid("nothing to undo"))?;
        let Some(target) = self.environment.get_mut(&entry.modality) else {
            let err = SimError::modality_not_found(entry.modality.as_str());
            self.history.push_undo(entry);
            return Err(err);
        };
        if let Err(e) = target.apply_undo(&entry.record) {
            warn!(event_id = %entry.event_id, error = %e, "undo failed");
            self.history.push_undo(entry);
            return Err(e.into());
        }
        let version = target.metadata().version;
        let outcome = HistoryOutcome {
            event_id: entry.event_id,
            modality: entry.modality.clone(),
            version,
            undo_depth: self.history.undo_depth(),
            redo_depth: self.history.redo_depth() + 1,
        };
        self.history.push_redo(entry);
        self.metrics.undo_count += 1;
        debug!(event_id = %outcome.event_id, modality = %outcome.modality, "undo applied");
        Ok(outcome)
    }

    fn redo(&mut self) -> Result<HistoryOutcome, SimError> {
        let entry = self
            .history
            .pop_redo()
            .ok_or_else(|| SimError::invalid("nothing to redo"))?;
        let Some(target) = self.environment.get_mut(&entry.modality) else {
            let err = SimError::modality_not_found(entry.modality.as_str());
            self.history.push_redo(entry);
            return Err(err);
        };
        let reapplied = target.create_undo_data(&entry.input).and_then(|record| {
            target.apply_input(&entry.input, entry.applied_at)?;
            Ok(record)
        });
        let record = match reapplied {
            Ok(record) => record,
            Err(e) => {
                warn!(event_id = %entry.event_id, error = %e, "redo failed");
                self.history.push_redo(entry);
                return Err(e.into());
            }
        };
        let version = target.metadata().version;
        let outcome = HistoryOutcome {
            event_id: entry.event_id,
            modality: entry.modality.clone(),
            version,
            undo_depth: self.history.undo_depth() + 1,
            redo_depth: self.history.redo_depth(),
        };
        self.history.push_undo(HistoryEntry { record, ..entry });
        self.metrics.redo_count += 1;
        debug!(event_id = %outcome.event_id, modality = %outcome.modality, "redo applied");
        Ok(outcome)
    }
}

// ── EngineCore ─────────────────────────────────────────────────────

struct EngineCore {
    state: Mutex<EngineState>,
    config: EngineConfig,
}

impl Ticker for EngineCore {
    fn tick(&self) -> Result<TickSummary, SimError> {
        self.state.lock().tick_at(Utc::now())
    }

    fn is_paused(&self) -> bool {
        self.state.lock().environment.time().is_paused()
    }
}

// ── SimulationEngine ───────────────────────────────────────────────

/// Coordinates a simulation run.
///
/// Callers own the engine (or an `Arc` of it) and drive it through its
/// methods; every method is safe to call from any thread.
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use envsim_core::Environment;
/// use envsim_engine::{EngineConfig, SimulationEngine};
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
/// let engine = SimulationEngine::new(Environment::new(start), EngineConfig::default()).unwrap();
/// engine.start(false, None).unwrap();
/// let result = engine.advance_time(TimeDelta::minutes(5)).unwrap();
/// assert_eq!(result.current_time, start + TimeDelta::minutes(5));
/// engine.stop().unwrap();
/// ```
pub struct SimulationEngine {
    core: Arc<EngineCore>,
    driver: Mutex<Option<SimulationLoop>>,
}

// Compile-time assertion: the engine can be shared across threads.
const _: () = {
    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send_sync::<SimulationEngine>();
    }
};

impl SimulationEngine {
    /// Build a stopped engine around `environment`.
    ///
    /// The environment (clock included) is copied as the reset point, and
    /// the clock's scale is set from `config.time_scale`.
    pub fn new(mut environment: Environment, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        environment
            .time_mut()
            .set_scale(config.time_scale)
            .map_err(|_| ConfigError::InvalidTimeScale {
                value: config.time_scale,
            })?;
        let state = EngineState {
            status: EngineStatus::Stopped,
            initial: environment.clone(),
            environment,
            queue: EventQueue::new(),
            history: UndoHistory::new(config.max_history),
            metrics: EngineMetrics::default(),
        };
        Ok(Self {
            core: Arc::new(EngineCore {
                state: Mutex::new(state),
                config,
            }),
            driver: Mutex::new(None),
        })
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Move from `Stopped` to `Running`.
    ///
    /// Applies `scale` if given, resumes the clock, and spawns the
    /// background loop when `auto_advance` is set.
    ///
    /// # Errors
    ///
    /// [`SimError::AlreadyRunning`] unless stopped;
    /// [`SimError::InvalidOperation`] for a bad scale or a failed spawn.
    /// The engine stays stopped on error.
    pub fn start(&self, auto_advance: bool, scale: Option<f64>) -> Result<StartSummary, SimError> {
        let mut driver = self.driver.lock();
        let summary = {
            let mut state = self.core.state.lock();
            if state.status != EngineStatus::Stopped {
                return Err(SimError::AlreadyRunning);
            }
            let time = state.environment.time_mut();
            if let Some(scale) = scale {
                time.set_scale(scale)?;
            }
            time.set_auto_advance(auto_advance);
            time.resume();
            state.status = EngineStatus::Running;
            StartSummary {
                time: state.environment.time().snapshot(),
                pending_events: state.queue.pending_count(),
            }
        };

        if auto_advance {
            let ticker: Arc<dyn Ticker> = self.core.clone();
            match SimulationLoop::start(ticker, self.core.config.loop_config.clone()) {
                Ok(lp) => *driver = Some(lp),
                Err(e) => {
                    let mut state = self.core.state.lock();
                    state.status = EngineStatus::Stopped;
                    state.environment.time_mut().set_auto_advance(false);
                    return Err(e);
                }
            }
        }

        info!(
            auto_advance,
            scale = summary.time.scale,
            current_time = %summary.time.current_time,
            "simulation started"
        );
        Ok(summary)
    }

    /// [`start`](Self::start) with the configured auto-advance setting.
    pub fn start_configured(&self) -> Result<StartSummary, SimError> {
        self.start(self.core.config.auto_advance, None)
    }

    /// Move from `Running` to `Stopped`.
    ///
    /// The background loop is stopped first, without holding the state
    /// lock, so a tick in progress completes before the status flips.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`] if already stopped.
    pub fn stop(&self) -> Result<ExecutionSummary, SimError> {
        let mut driver = self.driver.lock();
        self.core.state.lock().ensure_running()?;

        let loop_report = driver.take().map(|mut lp| lp.stop());

        let mut state = self.core.state.lock();
        state.status = EngineStatus::Stopped;
        state.environment.time_mut().set_auto_advance(false);
        let summary = ExecutionSummary {
            final_time: state.now(),
            counts: state.queue.summary().counts,
            ticks: state.metrics.ticks,
            loop_report,
        };
        info!(
            final_time = %summary.final_time,
            executed = summary.counts.executed,
            failed = summary.counts.failed,
            ticks = summary.ticks,
            "simulation stopped"
        );
        Ok(summary)
    }

    /// Return to the construction-time state.
    ///
    /// Stops the loop if running, prunes terminal events, clears undo
    /// history and metrics, and restores the clock and environment.
    /// Pending events are kept.
    pub fn reset(&self) -> ResetSummary {
        let mut driver = self.driver.lock();
        if let Some(mut lp) = driver.take() {
            lp.stop();
        }

        let mut state = self.core.state.lock();
        state.status = EngineStatus::Stopped;
        let cleared_events = state.queue.clear_executed(None);
        state.history.clear();
        state.environment = state.initial.clone();
        state.metrics = EngineMetrics::default();
        let summary = ResetSummary {
            time: state.environment.time().snapshot(),
            cleared_events,
            pending_events: state.queue.pending_count(),
        };
        info!(
            current_time = %summary.time.current_time,
            cleared_events,
            "simulation reset"
        );
        summary
    }

    // ── Time control ───────────────────────────────────────────

    /// Move time forward by `delta`, then run every event that became due.
    /// Works while paused.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`]; [`SimError::InvalidOperation`] if `delta`
    /// is not positive.
    pub fn advance_time(&self, delta: TimeDelta) -> Result<AdvanceResult, SimError> {
        self.core.state.lock().advance_time(delta)
    }

    /// Jump to `new_time`.
    ///
    /// Pending events scheduled strictly between the old and new time are
    /// either executed in order, with the clock stepping to each one's
    /// scheduled time (`execute_skipped`), or marked skipped. Events due at
    /// the new time then run. Works while paused.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`]; [`SimError::InvalidOperation`] if
    /// `new_time` is in the past.
    pub fn set_time(
        &self,
        new_time: DateTime<Utc>,
        execute_skipped: bool,
    ) -> Result<SetTimeResult, SimError> {
        self.core.state.lock().set_time(new_time, execute_skipped)
    }

    /// Jump to the next pending event and run everything due then.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`].
    pub fn skip_to_next_event(&self) -> Result<SkipResult, SimError> {
        self.core.state.lock().skip_to_next_event()
    }

    /// Suspend auto-advance.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`].
    pub fn pause(&self) -> Result<TimeSnapshot, SimError> {
        let mut state = self.core.state.lock();
        state.ensure_running()?;
        state.environment.time_mut().pause();
        debug!(current_time = %state.now(), "simulation paused");
        Ok(state.environment.time().snapshot())
    }

    /// Resume auto-advance. Wall time spent paused is not converted.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`].
    pub fn resume(&self) -> Result<TimeSnapshot, SimError> {
        let mut state = self.core.state.lock();
        state.ensure_running()?;
        state.environment.time_mut().resume();
        debug!(current_time = %state.now(), "simulation resumed");
        Ok(state.environment.time().snapshot())
    }

    /// Change the clock's scale.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] if `scale` is not positive and finite.
    pub fn set_scale(&self, scale: f64) -> Result<TimeSnapshot, SimError> {
        let mut state = self.core.state.lock();
        state.environment.time_mut().set_scale(scale)?;
        Ok(state.environment.time().snapshot())
    }

    /// Run every pending event due at the current time.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`].
    pub fn execute_due_events(&self) -> Result<Vec<EventOutcome>, SimError> {
        let mut state = self.core.state.lock();
        state.ensure_running()?;
        Ok(state.execute_due_events())
    }

    /// Convert wall time elapsed since the last clock update into virtual
    /// time, advance, and run what became due. No time moves while paused.
    ///
    /// # Errors
    ///
    /// [`SimError::NotRunning`].
    pub fn tick(&self) -> Result<TickSummary, SimError> {
        self.core.tick()
    }

    // ── Events ─────────────────────────────────────────────────

    /// Queue one event.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateId`].
    pub fn add_event(&self, event: SimulatorEvent) -> Result<EventId, SimError> {
        let id = event.id;
        self.core.state.lock().queue.add_event(event)?;
        debug!(event_id = %id, "event queued");
        Ok(id)
    }

    /// Queue a batch, all or nothing. Returns the number queued.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateId`].
    pub fn add_events(&self, events: Vec<SimulatorEvent>) -> Result<usize, SimError> {
        self.core.state.lock().queue.add_events(events)
    }

    /// Withdraw a pending event.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`]; [`SimError::InvalidTransition`] if the
    /// event is not pending.
    pub fn cancel_event(
        &self,
        id: EventId,
        reason: Option<&str>,
    ) -> Result<EventOutcome, SimError> {
        let mut state = self.core.state.lock();
        let event = state
            .queue
            .get_mut(id)
            .ok_or_else(|| SimError::event_not_found(id))?;
        event.cancel(reason.unwrap_or("cancelled"))?;
        let outcome = event.outcome();
        state.metrics.events_cancelled += 1;
        debug!(event_id = %id, "event cancelled");
        Ok(outcome)
    }

    /// Remove an event from the queue, in any status.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`].
    pub fn remove_event(&self, id: EventId) -> Result<SimulatorEvent, SimError> {
        self.core.state.lock().queue.remove_event(id)
    }

    /// Copy of one event.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`].
    pub fn get_event(&self, id: EventId) -> Result<SimulatorEvent, SimError> {
        self.core
            .state
            .lock()
            .queue
            .get(id)
            .cloned()
            .ok_or_else(|| SimError::event_not_found(id))
    }

    /// Copies of the events matching `filter`, in queue order.
    pub fn query_events(&self, filter: &EventFilter) -> Vec<SimulatorEvent> {
        let state = self.core.state.lock();
        state.queue.query(filter).into_iter().cloned().collect()
    }

    /// Drop terminal events, optionally only those scheduled before `before`.
    pub fn clear_executed(&self, before: Option<DateTime<Utc>>) -> usize {
        self.core.state.lock().queue.clear_executed(before)
    }

    // ── Undo / redo ────────────────────────────────────────────

    /// Revert the most recent executed mutation.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] when there is nothing to undo;
    /// [`SimError::Undo`] if the record does not fit the current state.
    pub fn undo(&self) -> Result<HistoryOutcome, SimError> {
        self.core.state.lock().undo()
    }

    /// Re-apply the most recently undone mutation.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] when there is nothing to redo;
    /// [`SimError::Modality`] if the input no longer applies.
    pub fn redo(&self) -> Result<HistoryOutcome, SimError> {
        self.core.state.lock().redo()
    }

    // ── Inspection ─────────────────────────────────────────────

    /// Serializable view of status, clock, domain state and queue.
    pub fn get_snapshot(&self) -> Result<SimulationSnapshot, SimError> {
        let state = self.core.state.lock();
        Ok(SimulationSnapshot {
            status: state.status,
            environment: state.environment.snapshot()?,
            queue: state.queue.summary(),
        })
    }

    /// Replace clock and domain state from a snapshot. Undo history is
    /// cleared, since its records describe the replaced state.
    ///
    /// The clock comes back in manual mode whatever mode the snapshot
    /// recorded; [`start`](Self::start) chooses the mode again.
    ///
    /// # Errors
    ///
    /// [`SimError::AlreadyRunning`] unless the engine is stopped.
    pub fn restore_snapshot(&self, snapshot: &EnvironmentSnapshot) -> Result<(), SimError> {
        let mut state = self.core.state.lock();
        if state.status != EngineStatus::Stopped {
            return Err(SimError::AlreadyRunning);
        }
        state.environment.restore(snapshot)?;
        state.environment.time_mut().set_auto_advance(false);
        state.history.clear();
        info!(current_time = %snapshot.time.current_time, "snapshot restored");
        Ok(())
    }

    /// Aggregate invariant check. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let state = self.core.state.lock();
        let mut problems = state.environment.validate();
        for event in state.queue.iter() {
            if event.status() == EventStatus::Pending
                && state.environment.get(&event.modality).is_none()
            {
                problems.push(format!(
                    "event {} targets unregistered modality '{}'",
                    event.id, event.modality
                ));
            }
        }
        problems
    }

    /// Lifecycle state.
    pub fn status(&self) -> EngineStatus {
        self.core.state.lock().status
    }

    /// Current virtual time.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.core.state.lock().now()
    }

    /// Clock state.
    pub fn time(&self) -> TimeSnapshot {
        self.core.state.lock().environment.time().snapshot()
    }

    /// Queue overview.
    pub fn queue_summary(&self) -> QueueSummary {
        self.core.state.lock().queue.summary()
    }

    /// Counters since construction or the last reset.
    pub fn metrics(&self) -> EngineMetrics {
        self.core.state.lock().metrics
    }

    /// Read the environment under the state lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&Environment) -> R) -> R {
        f(&self.core.state.lock().environment)
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        if let Some(mut lp) = self.driver.get_mut().take() {
            lp.stop();
        }
    }
}

impl fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("SimulationEngine")
            .field("status", &state.status)
            .field("current_time", &state.now())
            .field("queued", &state.queue.len())
            .field("undo_depth", &state.history.undo_depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsim_test_utils::{fail, probe_environment, record, t0, ProbeModality};

    fn engine() -> SimulationEngine {
        SimulationEngine::new(probe_environment(), EngineConfig::default()).unwrap()
    }

    fn at(minutes: i64, data: serde_json::Value) -> SimulatorEvent {
        SimulatorEvent::new(ProbeModality::NAME, t0() + TimeDelta::minutes(minutes), data)
            .with_created_at(t0())
    }

    fn applied(engine: &SimulationEngine) -> Vec<String> {
        engine.inspect(|env| env.state::<ProbeModality>().unwrap().applied.clone())
    }

    #[test]
    fn lifecycle_rejects_double_start_and_stop() {
        let e = engine();
        assert_eq!(e.status(), EngineStatus::Stopped);
        assert!(matches!(e.stop(), Err(SimError::NotRunning)));
        e.start(false, None).unwrap();
        assert!(matches!(e.start(false, None), Err(SimError::AlreadyRunning)));
        assert_eq!(e.status(), EngineStatus::Running);
        let summary = e.stop().unwrap();
        assert!(summary.loop_report.is_none());
        assert_eq!(e.status(), EngineStatus::Stopped);
    }

    #[test]
    fn time_control_requires_running() {
        let e = engine();
        assert!(matches!(
            e.advance_time(TimeDelta::seconds(1)),
            Err(SimError::NotRunning)
        ));
        assert!(matches!(e.set_time(t0(), false), Err(SimError::NotRunning)));
        assert!(matches!(e.skip_to_next_event(), Err(SimError::NotRunning)));
        assert!(matches!(e.pause(), Err(SimError::NotRunning)));
        assert!(matches!(e.tick(), Err(SimError::NotRunning)));
    }

    #[test]
    fn start_with_bad_scale_stays_stopped() {
        let e = engine();
        assert!(matches!(
            e.start(false, Some(0.0)),
            Err(SimError::InvalidOperation { .. })
        ));
        assert_eq!(e.status(), EngineStatus::Stopped);
    }

    #[test]
    fn advance_rejects_non_positive_delta() {
        let e = engine();
        e.start(false, None).unwrap();
        for delta in [TimeDelta::zero(), TimeDelta::seconds(-5)] {
            assert!(matches!(
                e.advance_time(delta),
                Err(SimError::InvalidOperation { .. })
            ));
        }
        assert_eq!(e.current_time(), t0());
    }

    #[test]
    fn advance_runs_due_events_in_order() {
        let e = engine();
        e.add_events(vec![at(10, record("late")), at(1, record("early"))])
            .unwrap();
        e.start(false, None).unwrap();

        let result = e.advance_time(TimeDelta::minutes(5)).unwrap();
        assert_eq!(result.previous_time, t0());
        assert_eq!(result.executed.len(), 1);
        assert_eq!(applied(&e), vec!["early"]);

        e.advance_time(TimeDelta::minutes(5)).unwrap();
        assert_eq!(applied(&e), vec!["early", "late"]);
        assert_eq!(e.metrics().events_executed, 2);
    }

    #[test]
    fn explicit_advance_works_while_paused() {
        let e = engine();
        e.add_event(at(1, record("x"))).unwrap();
        e.start(false, None).unwrap();
        e.pause().unwrap();
        let result = e.advance_time(TimeDelta::minutes(1)).unwrap();
        assert_eq!(result.executed.len(), 1);
        assert!(e.time().paused);
    }

    #[test]
    fn paused_tick_does_not_move_time() {
        let e = engine();
        e.start(false, Some(1000.0)).unwrap();
        e.pause().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let summary = e.tick().unwrap();
        assert_eq!(summary.advanced_ns, 0);
        assert_eq!(summary.current_time, t0());
    }

    #[test]
    fn tick_converts_wall_time_with_scale() {
        let e = engine();
        e.start(false, Some(60.0)).unwrap();
        let anchor = {
            let state = e.core.state.lock();
            state.environment.time().wall_anchor()
        };
        let summary = e
            .core
            .state
            .lock()
            .tick_at(anchor + TimeDelta::seconds(2))
            .unwrap();
        assert_eq!(summary.advanced_ns, 120_000_000_000);
        assert_eq!(summary.current_time, t0() + TimeDelta::minutes(2));
        assert_eq!(e.metrics().ticks, 1);
    }

    #[test]
    fn cancel_event_then_cancel_again_fails() {
        let e = engine();
        let id = e.add_event(at(1, record("x"))).unwrap();
        let outcome = e.cancel_event(id, Some("changed plans")).unwrap();
        assert_eq!(outcome.status, EventStatus::Cancelled);
        assert!(matches!(
            e.cancel_event(id, None),
            Err(SimError::InvalidTransition { .. })
        ));
        assert!(matches!(
            e.cancel_event(EventId::new(), None),
            Err(SimError::NotFound { .. })
        ));
        assert_eq!(e.metrics().events_cancelled, 1);
    }

    #[test]
    fn get_and_remove_event() {
        let e = engine();
        let id = e.add_event(at(1, record("x"))).unwrap();
        assert_eq!(e.get_event(id).unwrap().id, id);
        e.remove_event(id).unwrap();
        assert!(matches!(e.get_event(id), Err(SimError::NotFound { .. })));
    }

    #[test]
    fn failed_event_counts_and_batch_continues() {
        let e = engine();
        e.add_events(vec![at(1, fail("boom")), at(1, record("after"))])
            .unwrap();
        e.start(false, None).unwrap();
        let result = e.advance_time(TimeDelta::minutes(1)).unwrap();
        let statuses: Vec<_> = result.executed.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![EventStatus::Failed, EventStatus::Executed]);
        assert_eq!(e.metrics().events_failed, 1);
        assert_eq!(applied(&e), vec!["after"]);
    }

    #[test]
    fn reset_restores_initial_state_and_keeps_pending() {
        let e = engine();
        e.add_events(vec![at(1, record("a")), at(60, record("later"))])
            .unwrap();
        e.start(false, None).unwrap();
        e.advance_time(TimeDelta::minutes(5)).unwrap();

        let summary = e.reset();
        assert_eq!(summary.cleared_events, 1);
        assert_eq!(summary.pending_events, 1);
        assert_eq!(summary.time.current_time, t0());
        assert_eq!(e.status(), EngineStatus::Stopped);
        assert!(applied(&e).is_empty());
        assert_eq!(e.metrics(), EngineMetrics::default());
        assert!(matches!(e.undo(), Err(SimError::InvalidOperation { .. })));
    }

    #[test]
    fn validate_reports_orphan_events() {
        let e = engine();
        assert!(e.validate().is_empty());
        e.add_event(SimulatorEvent::new("calendar", t0(), serde_json::json!({})))
            .unwrap();
        let problems = e.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("calendar"));
    }

    #[test]
    fn snapshot_flattens_environment() {
        let e = engine();
        let snap = e.get_snapshot().unwrap();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "stopped");
        assert!(json["time"]["current_time"].is_string());
        assert!(json["modalities"][ProbeModality::NAME].is_object());
        assert_eq!(json["queue"]["total"], 0);
    }

    #[test]
    fn restore_snapshot_clears_history() {
        let e = engine();
        let before = e.get_snapshot().unwrap().environment;
        e.add_event(at(0, record("x"))).unwrap();
        e.start(false, None).unwrap();
        e.execute_due_events().unwrap();
        assert_eq!(applied(&e), vec!["x"]);

        e.stop().unwrap();
        e.restore_snapshot(&before).unwrap();
        assert!(applied(&e).is_empty());
        assert!(matches!(e.undo(), Err(SimError::InvalidOperation { .. })));
    }

    #[test]
    fn restore_snapshot_requires_stopped_engine() {
        let e = engine();
        let before = e.get_snapshot().unwrap().environment;
        e.start(false, None).unwrap();
        e.advance_time(TimeDelta::hours(1)).unwrap();

        assert!(matches!(
            e.restore_snapshot(&before),
            Err(SimError::AlreadyRunning)
        ));
        assert_eq!(e.time().current_time, t0() + TimeDelta::hours(1));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = EngineConfig {
            time_scale: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            SimulationEngine::new(probe_environment(), config),
            Err(ConfigError::InvalidTimeScale { .. })
        ));
    }
}
