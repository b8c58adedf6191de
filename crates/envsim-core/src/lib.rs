//! Core types and traits for the envsim simulator.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental abstractions used throughout the envsim workspace:
//! event IDs and statuses, the error taxonomy, the virtual clock
//! ([`SimulatorTime`]), the reversible-mutation contract every domain
//! object implements ([`Modality`] / [`ModalityState`]), and the
//! [`Environment`] that holds domain state during a run.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod environment;
pub mod error;
pub mod id;
pub mod modality;
pub mod status;
pub mod time;

pub use environment::{Environment, EnvironmentSnapshot};
pub use error::{ExecutionError, ModalityError, SimError, UndoError};
pub use id::EventId;
pub use modality::{Modality, ModalityState, StateMetadata, UndoAction, UndoRecord, NOOP_ACTION};
pub use status::EventStatus;
pub use time::{SimulatorTime, TimeMode, TimeSnapshot};
