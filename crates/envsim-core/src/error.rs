//! Error types for the envsim simulator.
//!
//! Organized by subsystem: [`SimError`] is what every engine, queue and
//! clock operation returns; [`ModalityError`] and [`UndoError`] come from
//! domain objects; [`ExecutionError`] is recorded on an event when its
//! mutation fails and is never propagated past the event boundary.

use thiserror::Error;

use crate::id::EventId;
use crate::status::EventStatus;

/// Errors surfaced by the engine, the event queue, and the clock.
///
/// `AlreadyRunning`, `NotRunning`, `InvalidOperation` and `NotFound` are
/// recoverable request rejections. `DuplicateId` and `InvalidTransition`
/// are programming errors. The `Undo` family signals undo-path corruption
/// and is never silently recovered.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimError {
    /// `start()` was called on an engine that is not stopped.
    #[error("simulation is already running")]
    AlreadyRunning,
    /// A time-control operation was called on a stopped engine.
    #[error("simulation is not running")]
    NotRunning,
    /// The request violates a clock or engine rule
    /// (negative delta, backward jump, non-positive scale, ...).
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Human-readable description of the violated rule.
        reason: String,
    },
    /// An event or domain object could not be found.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// What was looked up (`"event"`, `"modality"`).
        kind: &'static str,
        /// The identifier that was not found.
        id: String,
    },
    /// An event with this ID is already queued.
    #[error("duplicate event id {id}")]
    DuplicateId {
        /// The conflicting ID.
        id: EventId,
    },
    /// The event is not in a status that allows the requested transition.
    #[error("event {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The event.
        id: EventId,
        /// Its current status.
        from: EventStatus,
        /// The requested status.
        to: EventStatus,
    },
    /// A domain object rejected a direct (non-event) call.
    #[error(transparent)]
    Modality(#[from] ModalityError),
    /// The undo path found a corrupt record or corrupt state.
    #[error(transparent)]
    Undo(#[from] UndoError),
}

impl SimError {
    /// Stable machine-readable code for the request-handling layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::InvalidOperation { .. } => "invalid_operation",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Modality(_) => "modality_error",
            Self::Undo(e) => e.code(),
        }
    }

    /// Shorthand for [`SimError::InvalidOperation`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a missing event.
    pub fn event_not_found(id: EventId) -> Self {
        Self::NotFound {
            kind: "event",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing domain object.
    pub fn modality_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "modality",
            id: name.into(),
        }
    }
}

/// Errors from a domain object's forward path (input decoding and
/// application, snapshot encoding and restore).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ModalityError {
    /// The payload could not be decoded into the modality's input type.
    #[error("invalid input for {modality}: {reason}")]
    InvalidInput {
        /// Target modality.
        modality: String,
        /// Decoder or validation message.
        reason: String,
    },
    /// The input decoded but the modality refused to apply it.
    #[error("{modality} rejected input: {reason}")]
    Rejected {
        /// Target modality.
        modality: String,
        /// Why the input was refused.
        reason: String,
    },
    /// A snapshot value could not be restored into this modality.
    #[error("invalid {modality} snapshot: {reason}")]
    InvalidSnapshot {
        /// Target modality.
        modality: String,
        /// Decoder or validation message.
        reason: String,
    },
    /// State or an undo record could not be encoded or decoded.
    #[error("{modality} serialization failed: {reason}")]
    Serialization {
        /// Target modality.
        modality: String,
        /// Encoder message.
        reason: String,
    },
}

impl ModalityError {
    /// Shorthand for [`ModalityError::Rejected`].
    pub fn rejected(modality: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            modality: modality.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from `apply_undo`. All of them indicate a bug or corrupted
/// history rather than a normal runtime condition.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UndoError {
    /// A required field is missing or ill-typed, or the record belongs to
    /// another modality.
    #[error("malformed undo record for {modality}: {reason}")]
    MalformedUndoRecord {
        /// Modality the record was applied to.
        modality: String,
        /// What was wrong with the record.
        reason: String,
    },
    /// The record's discriminant is not one this modality produces.
    #[error("{modality} has no undo action '{action}'")]
    UnknownAction {
        /// Modality the record was applied to.
        modality: String,
        /// The unrecognized discriminant.
        action: String,
    },
    /// The entity the record refers to is not where it must be.
    #[error("inconsistent {modality} state during undo: {reason}")]
    InconsistentState {
        /// Modality the record was applied to.
        modality: String,
        /// Which entity was missing or unexpectedly present.
        reason: String,
    },
}

impl UndoError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedUndoRecord { .. } => "malformed_undo_record",
            Self::UnknownAction { .. } => "unknown_action",
            Self::InconsistentState { .. } => "inconsistent_state",
        }
    }

    /// Shorthand for [`UndoError::InconsistentState`].
    pub fn inconsistent(modality: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentState {
            modality: modality.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single event's execution failed.
///
/// Recorded on the event as its error description; the engine keeps
/// running the rest of the batch.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The event payload is not a JSON object.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// Description of the payload problem.
        reason: String,
    },
    /// No domain object with the event's target name is registered.
    #[error("unknown target modality '{modality}'")]
    UnknownTarget {
        /// The target name.
        modality: String,
    },
    /// The target domain object failed to capture undo data or apply input.
    #[error(transparent)]
    Modality(#[from] ModalityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_errors_keep_their_code_through_sim_error() {
        let err: SimError = UndoError::UnknownAction {
            modality: "email".into(),
            action: "explode".into(),
        }
        .into();
        assert_eq!(err.code(), "unknown_action");
        assert_eq!(err.to_string(), "email has no undo action 'explode'");
    }

    #[test]
    fn not_found_names_the_kind() {
        let err = SimError::modality_not_found("calendar");
        assert_eq!(err.to_string(), "modality 'calendar' not found");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn execution_error_is_transparent_over_modality_error() {
        let err: ExecutionError = ModalityError::rejected("sms", "no such thread").into();
        assert_eq!(err.to_string(), "sms rejected input: no such thread");
    }
}
