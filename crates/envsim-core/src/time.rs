//! Virtual clock.
//!
//! [`SimulatorTime`] holds the authoritative simulated timestamp. It never
//! advances itself: the engine asks it how much virtual time corresponds
//! to a stretch of wall time ([`SimulatorTime::calculate_advancement`])
//! and then applies that delta explicitly.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// How virtual time moves forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// Time only moves on explicit `advance` / `set_time` calls.
    #[default]
    Manual,
    /// A background loop converts elapsed wall time into virtual time.
    AutoAdvance,
}

/// Serializable view of the clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSnapshot {
    /// Current virtual time.
    pub current_time: DateTime<Utc>,
    /// Virtual seconds per wall second.
    pub scale: f64,
    /// Whether auto-advance is suspended.
    pub paused: bool,
    /// Current time-control mode.
    pub mode: TimeMode,
}

/// The simulation's virtual clock.
///
/// Invariants: `time_scale` is positive and finite, and `current_time`
/// never decreases except through [`restore`](Self::restore).
#[derive(Clone, Debug)]
pub struct SimulatorTime {
    current_time: DateTime<Utc>,
    time_scale: f64,
    is_paused: bool,
    wall_anchor: DateTime<Utc>,
    auto_advance: bool,
}

impl SimulatorTime {
    /// Clock starting at `start`, real-time scale, not paused, manual mode.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current_time: start,
            time_scale: 1.0,
            is_paused: false,
            wall_anchor: Utc::now(),
            auto_advance: false,
        }
    }

    /// Clock starting at `start` with the given scale.
    pub fn with_scale(start: DateTime<Utc>, scale: f64) -> Result<Self, SimError> {
        let mut clock = Self::new(start);
        clock.set_scale(scale)?;
        Ok(clock)
    }

    /// Current virtual time.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    /// Virtual seconds per wall second.
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Whether auto-advance is suspended.
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    /// Wall instant at which the current time was last set.
    pub fn wall_anchor(&self) -> DateTime<Utc> {
        self.wall_anchor
    }

    /// Whether the clock is driven by the background loop.
    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    /// Current time-control mode.
    pub fn mode(&self) -> TimeMode {
        if self.auto_advance {
            TimeMode::AutoAdvance
        } else {
            TimeMode::Manual
        }
    }

    /// Virtual time that corresponds to `wall_elapsed` at the current scale.
    ///
    /// Zero while paused. Computed at nanosecond precision and saturated
    /// at the largest representable delta.
    pub fn calculate_advancement(&self, wall_elapsed: Duration) -> TimeDelta {
        if self.is_paused {
            return TimeDelta::zero();
        }
        let nanos = (wall_elapsed.as_nanos() as f64 * self.time_scale).round();
        if nanos >= i64::MAX as f64 {
            TimeDelta::nanoseconds(i64::MAX)
        } else {
            TimeDelta::nanoseconds(nanos as i64)
        }
    }

    /// Wall time elapsed since the anchor, clamped at zero.
    pub fn wall_elapsed(&self, wall_now: DateTime<Utc>) -> Duration {
        (wall_now - self.wall_anchor)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Move virtual time forward by `delta`.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] if the clock is paused, `delta` is
    /// negative, or the result is out of range. State is unchanged on error.
    pub fn advance(&mut self, delta: TimeDelta) -> Result<(), SimError> {
        self.advance_at(delta, Utc::now())
    }

    /// [`advance`](Self::advance) with an explicit wall instant for the anchor.
    pub fn advance_at(&mut self, delta: TimeDelta, wall_now: DateTime<Utc>) -> Result<(), SimError> {
        if self.is_paused {
            return Err(SimError::invalid("cannot advance a paused clock"));
        }
        if delta < TimeDelta::zero() {
            return Err(SimError::invalid(format!(
                "cannot advance by a negative delta ({delta})"
            )));
        }
        let next = self
            .current_time
            .checked_add_signed(delta)
            .ok_or_else(|| SimError::invalid("virtual time out of range"))?;
        self.current_time = next;
        self.wall_anchor = wall_now;
        Ok(())
    }

    /// Jump to an absolute time. Allowed while paused.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] if `new_time` is before the current
    /// time. State is unchanged on error.
    pub fn set_time(&mut self, new_time: DateTime<Utc>) -> Result<(), SimError> {
        if new_time < self.current_time {
            return Err(SimError::invalid(format!(
                "cannot move time backward from {} to {new_time}",
                self.current_time
            )));
        }
        self.current_time = new_time;
        self.wall_anchor = Utc::now();
        Ok(())
    }

    /// Suspend auto-advance.
    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    /// Resume auto-advance; wall time spent paused is not converted.
    pub fn resume(&mut self) {
        self.is_paused = false;
        self.wall_anchor = Utc::now();
    }

    /// Change the scale factor.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] if `scale` is not positive and finite.
    pub fn set_scale(&mut self, scale: f64) -> Result<(), SimError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(SimError::invalid(format!(
                "time scale must be positive and finite, got {scale}"
            )));
        }
        self.time_scale = scale;
        Ok(())
    }

    /// Switch between manual and auto-advance mode.
    pub fn set_auto_advance(&mut self, enabled: bool) {
        self.auto_advance = enabled;
    }

    /// Check clock invariants. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            problems.push(format!(
                "time scale must be positive and finite, got {}",
                self.time_scale
            ));
        }
        problems
    }

    /// Capture the clock's serializable state.
    pub fn snapshot(&self) -> TimeSnapshot {
        TimeSnapshot {
            current_time: self.current_time,
            scale: self.time_scale,
            paused: self.is_paused,
            mode: self.mode(),
        }
    }

    /// Replace the clock's state with `snapshot`. May move time backward.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] if the snapshot's scale is invalid.
    pub fn restore(&mut self, snapshot: &TimeSnapshot) -> Result<(), SimError> {
        self.set_scale(snapshot.scale)?;
        self.current_time = snapshot.current_time;
        self.is_paused = snapshot.paused;
        self.auto_advance = snapshot.mode == TimeMode::AutoAdvance;
        self.wall_anchor = Utc::now();
        Ok(())
    }
}
