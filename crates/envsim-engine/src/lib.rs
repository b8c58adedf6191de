//! Simulation engine for envsim.
//!
//! Provides the [`SimulationEngine`] that coordinates the virtual clock,
//! the [`EventQueue`], the environment and the undo history, plus the
//! [`SimulationLoop`] that drives auto-advance from a background thread.
//! Time moves in three ways: explicit advancement
//! ([`SimulationEngine::advance_time`], [`SimulationEngine::set_time`]),
//! event-driven jumps ([`SimulationEngine::skip_to_next_event`]), and
//! wall-clock auto-advance through [`SimulationEngine::tick`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod driver;
pub mod engine;
pub mod event;
pub mod history;
pub mod metrics;
pub mod queue;

pub use config::{ConfigError, EngineConfig, LoopConfig};
pub use driver::{LoopReport, SimulationLoop, Ticker};
pub use engine::{
    AdvanceResult, EngineStatus, ExecutionSummary, HistoryOutcome, ResetSummary,
    SetTimeResult, SimulationEngine, SimulationSnapshot, SkipResult, StartSummary, TickSummary,
};
pub use event::{EventOutcome, SimulatorEvent};
pub use history::{HistoryEntry, UndoHistory};
pub use metrics::EngineMetrics;
pub use queue::{EventFilter, EventQueue, QueueSummary, StatusCounts};
