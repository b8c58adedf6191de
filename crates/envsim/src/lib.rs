//! envsim: a deterministic virtual-time simulator for agent environments.
//!
//! This is the facade crate that re-exports the public API of the envsim
//! sub-crates. Most users only need this one dependency.
//!
//! # Quick start
//!
//! ```rust
//! use chrono::{TimeDelta, TimeZone, Utc};
//! use envsim::prelude::*;
//! use serde_json::json;
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
//! let environment = Environment::new(start)
//!     .with_modality(EmailState::new(start))
//!     .unwrap();
//! let engine = SimulationEngine::new(environment, EngineConfig::default()).unwrap();
//!
//! engine
//!     .add_event(SimulatorEvent::new(
//!         "email",
//!         start + TimeDelta::minutes(5),
//!         json!({
//!             "operation": "receive",
//!             "email_id": "welcome",
//!             "from": "hr@example.com",
//!             "subject": "Welcome aboard",
//!         }),
//!     ))
//!     .unwrap();
//!
//! engine.start(false, None).unwrap();
//! engine.skip_to_next_event().unwrap();
//! let unread = engine.inspect(|env| env.state::<EmailState>().unwrap().unread_count());
//! assert_eq!(unread, 1);
//!
//! engine.undo().unwrap();
//! let unread = engine.inspect(|env| env.state::<EmailState>().unwrap().unread_count());
//! assert_eq!(unread, 0);
//! engine.stop().unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `envsim-core` | Clock, modality contract, environment, errors |
//! | [`engine`] | `envsim-engine` | Event queue, engine, undo history, auto-advance loop |
//! | [`modalities`] | `envsim-modalities` | Reference email and location modalities |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and traits (`envsim-core`).
///
/// The [`types::Modality`] trait is the main extension point for
/// user-defined domain objects.
pub use envsim_core as types;

/// Simulation engine (`envsim-engine`).
///
/// [`engine::SimulationEngine`] coordinates the clock, the
/// [`engine::EventQueue`] and undo history;
/// [`engine::SimulationLoop`] drives auto-advance.
pub use envsim_engine as engine;

/// Reference modalities (`envsim-modalities`).
pub use envsim_modalities as modalities;

/// Common imports for typical envsim usage.
///
/// ```rust
/// use envsim::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use envsim_core::{
        Environment, EventId, EventStatus, Modality, ModalityState, SimulatorTime,
        StateMetadata, TimeSnapshot, UndoAction, UndoRecord,
    };

    // Errors
    pub use envsim_core::{ModalityError, SimError, UndoError};

    // Engine
    pub use envsim_engine::{
        EngineConfig, EngineStatus, EventFilter, SimulationEngine, SimulatorEvent, SkipResult,
    };

    // Modalities
    pub use envsim_modalities::{EmailState, LocationState};
}
