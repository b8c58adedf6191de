//! Reference modalities for envsim.
//!
//! Two domain objects that exercise the reversible-mutation contract end
//! to end:
//!
//! - [`EmailState`]: an inbox with threads, folders and read flags.
//!   Receiving into an unknown thread creates it; deleting a thread's
//!   last email removes it.
//! - [`LocationState`]: the current position fix, a bounded fix history
//!   and a set of named places.
//!
//! Both register into an [`Environment`](envsim_core::Environment) under
//! their `MODALITY_TYPE` (`"email"` and `"location"`).

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod email;
pub mod location;

pub use email::{Email, EmailInput, EmailState, EmailUndo, Thread};
pub use location::{
    Location, LocationInput, LocationState, LocationUndo, SavedPlace, DEFAULT_MAX_HISTORY,
};
