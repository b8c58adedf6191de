//! In-process engine counters.
//!
//! [`EngineMetrics`] is updated under the engine's state lock and read
//! as a copy through [`SimulationEngine::metrics`](crate::SimulationEngine::metrics).
//! Counters are cumulative since construction or the last `reset()`.

use serde::{Deserialize, Serialize};

/// Cumulative engine counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Completed `tick()` calls, from the loop or from callers.
    pub ticks: u64,
    /// Events that reached `Executed`.
    pub events_executed: u64,
    /// Events that reached `Failed`.
    pub events_failed: u64,
    /// Events marked `Skipped` by a time jump.
    pub events_skipped: u64,
    /// Events cancelled through the engine.
    pub events_cancelled: u64,
    /// Successful `undo()` calls.
    pub undo_count: u64,
    /// Successful `redo()` calls.
    pub redo_count: u64,
    /// Wall-clock duration of the most recent tick, in microseconds.
    pub last_tick_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = EngineMetrics::default();
        assert_eq!(m.ticks, 0);
        assert_eq!(m.events_executed + m.events_failed, 0);
        assert_eq!(m.last_tick_us, 0);
    }
}
