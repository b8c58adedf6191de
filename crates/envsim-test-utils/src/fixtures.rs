//! Reusable modality fixtures.
//!
//! [`ProbeModality`] records every label it is given, in order, and can
//! be told to reject an input. Engine and queue tests use it to observe
//! execution order and failure isolation without a real domain.

use chrono::{DateTime, Utc};
use envsim_core::{Modality, ModalityError, StateMetadata, UndoAction, UndoError};
use serde::{Deserialize, Serialize};

/// Appends labels to a list; rejects `fail` inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeModality {
    pub metadata: StateMetadata,
    pub applied: Vec<String>,
}

impl ProbeModality {
    /// Registration name.
    pub const NAME: &'static str = "probe";

    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            metadata: StateMetadata::new(created),
            applied: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProbeInput {
    Record { label: String },
    Fail { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProbeUndo {
    Noop,
    RemoveLast { label: String },
}

impl UndoAction for ProbeUndo {
    const ACTIONS: &'static [&'static str] = &["noop", "remove_last"];
}

impl Modality for ProbeModality {
    const MODALITY_TYPE: &'static str = Self::NAME;
    type Input = ProbeInput;
    type Undo = ProbeUndo;

    fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut StateMetadata {
        &mut self.metadata
    }

    fn capture_undo(&self, input: &ProbeInput) -> Result<ProbeUndo, ModalityError> {
        Ok(match input {
            ProbeInput::Record { label } => ProbeUndo::RemoveLast {
                label: label.clone(),
            },
            ProbeInput::Fail { .. } => ProbeUndo::Noop,
        })
    }

    fn apply(&mut self, input: ProbeInput, _now: DateTime<Utc>) -> Result<(), ModalityError> {
        match input {
            ProbeInput::Record { label } => {
                self.applied.push(label);
                Ok(())
            }
            ProbeInput::Fail { reason } => Err(ModalityError::rejected(Self::NAME, reason)),
        }
    }

    fn revert(&mut self, undo: ProbeUndo) -> Result<(), UndoError> {
        match undo {
            ProbeUndo::Noop => Ok(()),
            ProbeUndo::RemoveLast { label } => match self.applied.last() {
                Some(last) if *last == label => {
                    self.applied.pop();
                    Ok(())
                }
                other => Err(UndoError::inconsistent(
                    Self::NAME,
                    format!("expected last label '{label}', found {other:?}"),
                )),
            },
        }
    }
}
