//! The reversible-mutation contract.
//!
//! Domain authors implement the typed [`Modality`] trait: a state struct,
//! a closed input enum, and a closed undo enum. A blanket impl bridges
//! every `Modality` to the object-safe [`ModalityState`] that the
//! [`Environment`](crate::Environment) stores, handling payload decoding,
//! version bookkeeping, and [`UndoRecord`] encoding in one place.
//!
//! Undo capture rules every implementation follows:
//!
//! - Additive operations capture only the key needed to remove the entity.
//! - Destructive and modifying operations capture the entire previous value.
//! - Operations that change nothing return the `noop` discriminant; they
//!   still bump the version, and undoing them restores metadata only.
//! - Entities created as a side effect are captured with a "was newly
//!   created" flag and removed on undo.
//! - Bulk operations capture every affected entity's prior value.

use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModalityError, UndoError};

/// Discriminant of an undo record for an operation that changed nothing.
pub const NOOP_ACTION: &str = "noop";

/// Bookkeeping every domain object carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    /// Incremented on every applied input, including no-ops.
    pub version: u64,
    /// Virtual time of the last applied input.
    pub last_updated: DateTime<Utc>,
}

impl StateMetadata {
    /// Fresh metadata at version 0.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            last_updated: created,
        }
    }

    /// Record one applied input at virtual time `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version = self.version.saturating_add(1);
        self.last_updated = now;
    }
}

/// Everything needed to revert one applied input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoRecord {
    /// The modality that produced the record.
    pub modality_type: String,
    /// Action discriminant.
    pub action: String,
    /// Version before the input was applied.
    pub previous_version: u64,
    /// `last_updated` before the input was applied.
    pub previous_last_updated: DateTime<Utc>,
    /// Action-specific fields.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl UndoRecord {
    /// Whether this record reverts an operation that changed nothing.
    pub fn is_noop(&self) -> bool {
        self.action == NOOP_ACTION
    }
}

/// A closed undo enum, serialized with an internal `action` tag.
///
/// Implementors derive serde with `#[serde(tag = "action", rename_all =
/// "snake_case")]` and include a unit `Noop` variant.
pub trait UndoAction: Serialize + DeserializeOwned {
    /// Every discriminant this enum serializes to.
    const ACTIONS: &'static [&'static str];
}

/// A typed domain object that supports exact undo.
pub trait Modality: Clone + fmt::Debug + Send + Serialize + DeserializeOwned + 'static {
    /// Self-reported name; also the key the object is registered under.
    const MODALITY_TYPE: &'static str;

    /// Decoded mutation payload.
    type Input: DeserializeOwned;
    /// Undo data for one applied input.
    type Undo: UndoAction;

    /// Version and last-updated bookkeeping.
    fn metadata(&self) -> &StateMetadata;

    /// Mutable access to the bookkeeping; used by the undo path.
    fn metadata_mut(&mut self) -> &mut StateMetadata;

    /// Capture what `apply(input)` is about to change. Called before
    /// `apply`, against the unmodified state.
    fn capture_undo(&self, input: &Self::Input) -> Result<Self::Undo, ModalityError>;

    /// Apply `input`. Must not leave a partial mutation behind on error.
    fn apply(&mut self, input: Self::Input, now: DateTime<Utc>) -> Result<(), ModalityError>;

    /// Revert one applied input. Metadata is restored by the caller.
    fn revert(&mut self, undo: Self::Undo) -> Result<(), UndoError>;

    /// Domain invariant check. Empty means valid.
    fn validate(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Object-safe view of a domain object, as stored in the environment.
pub trait ModalityState: fmt::Debug + Send {
    /// Self-reported name.
    fn modality_type(&self) -> &str;

    /// Version and last-updated bookkeeping.
    fn metadata(&self) -> &StateMetadata;

    /// Decode and apply a JSON payload at virtual time `now`.
    fn apply_input(&mut self, input: &Value, now: DateTime<Utc>) -> Result<(), ModalityError>;

    /// Capture an undo record for `input` against the current state.
    fn create_undo_data(&self, input: &Value) -> Result<UndoRecord, ModalityError>;

    /// Revert the input `record` was captured for.
    fn apply_undo(&mut self, record: &UndoRecord) -> Result<(), UndoError>;

    /// Serialize the full state.
    fn snapshot(&self) -> Result<Value, ModalityError>;

    /// Replace the full state from a snapshot.
    fn restore(&mut self, snapshot: &Value) -> Result<(), ModalityError>;

    /// Domain invariant check. Empty means valid.
    fn validate(&self) -> Vec<String>;

    /// Deep copy behind a fresh box.
    fn clone_state(&self) -> Box<dyn ModalityState>;

    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn ModalityState + 'a {
    /// Borrow as the concrete modality type, if it is one.
    pub fn downcast_ref<M: Modality>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

impl Clone for Box<dyn ModalityState> {
    fn clone(&self) -> Self {
        self.clone_state()
    }
}

fn decode_input<M: Modality>(input: &Value) -> Result<M::Input, ModalityError> {
    <M::Input as Deserialize>::deserialize(input).map_err(|e| ModalityError::InvalidInput {
        modality: M::MODALITY_TYPE.to_string(),
        reason: e.to_string(),
    })
}

fn malformed<M: Modality>(reason: impl Into<String>) -> UndoError {
    UndoError::MalformedUndoRecord {
        modality: M::MODALITY_TYPE.to_string(),
        reason: reason.into(),
    }
}

impl<M: Modality> ModalityState for M {
    fn modality_type(&self) -> &str {
        M::MODALITY_TYPE
    }

    fn metadata(&self) -> &StateMetadata {
        Modality::metadata(self)
    }

    fn apply_input(&mut self, input: &Value, now: DateTime<Utc>) -> Result<(), ModalityError> {
        let input = decode_input::<M>(input)?;
        self.apply(input, now)?;
        self.metadata_mut().touch(now);
        Ok(())
    }

    fn create_undo_data(&self, input: &Value) -> Result<UndoRecord, ModalityError> {
        let input = decode_input::<M>(input)?;
        let undo = self.capture_undo(&input)?;
        let serialization = |reason: String| ModalityError::Serialization {
            modality: M::MODALITY_TYPE.to_string(),
            reason,
        };
        let encoded = serde_json::to_value(undo).map_err(|e| serialization(e.to_string()))?;
        let mut data = match encoded {
            Value::Object(map) => map,
            other => return Err(serialization(format!("undo data is not an object: {other}"))),
        };
        let action = match data.remove("action") {
            Some(Value::String(action)) => action,
            _ => return Err(serialization("undo data has no string 'action' tag".into())),
        };
        let meta = Modality::metadata(self);
        Ok(UndoRecord {
            modality_type: M::MODALITY_TYPE.to_string(),
            action,
            previous_version: meta.version,
            previous_last_updated: meta.last_updated,
            data,
        })
    }

    fn apply_undo(&mut self, record: &UndoRecord) -> Result<(), UndoError> {
        if record.modality_type != M::MODALITY_TYPE {
            return Err(malformed::<M>(format!(
                "record belongs to '{}'",
                record.modality_type
            )));
        }
        if !record.is_noop() {
            if !M::Undo::ACTIONS.contains(&record.action.as_str()) {
                return Err(UndoError::UnknownAction {
                    modality: M::MODALITY_TYPE.to_string(),
                    action: record.action.clone(),
                });
            }
            let mut tagged = record.data.clone();
            tagged.insert("action".into(), Value::String(record.action.clone()));
            let undo: M::Undo = serde_json::from_value(Value::Object(tagged))
                .map_err(|e| malformed::<M>(e.to_string()))?;
            self.revert(undo)?;
        }
        let meta = self.metadata_mut();
        meta.version = record.previous_version;
        meta.last_updated = record.previous_last_updated;
        Ok(())
    }

    fn snapshot(&self) -> Result<Value, ModalityError> {
        serde_json::to_value(self).map_err(|e| ModalityError::Serialization {
            modality: M::MODALITY_TYPE.to_string(),
            reason: e.to_string(),
        })
    }

    fn restore(&mut self, snapshot: &Value) -> Result<(), ModalityError> {
        let invalid = |reason: String| ModalityError::InvalidSnapshot {
            modality: M::MODALITY_TYPE.to_string(),
            reason,
        };
        let restored = <M as Deserialize>::deserialize(snapshot).map_err(|e| invalid(e.to_string()))?;
        let problems = Modality::validate(&restored);
        if !problems.is_empty() {
            return Err(invalid(problems.join("; ")));
        }
        *self = restored;
        Ok(())
    }

    fn validate(&self) -> Vec<String> {
        Modality::validate(self)
    }

    fn clone_state(&self) -> Box<dyn ModalityState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        metadata: StateMetadata,
        value: i64,
    }

    #[derive(Deserialize)]
    #[serde(tag = "operation", rename_all = "snake_case")]
    enum CounterInput {
        Add { amount: i64 },
        Reset,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "action", rename_all = "snake_case")]
    enum CounterUndo {
        Noop,
        Subtract { amount: i64 },
        RestoreValue { value: i64 },
    }

    impl UndoAction for CounterUndo {
        const ACTIONS: &'static [&'static str] = &["noop", "subtract", "restore_value"];
    }

    impl Modality for Counter {
        const MODALITY_TYPE: &'static str = "counter";
        type Input = CounterInput;
        type Undo = CounterUndo;

        fn metadata(&self) -> &StateMetadata {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut StateMetadata {
            &mut self.metadata
        }

        fn capture_undo(&self, input: &CounterInput) -> Result<CounterUndo, ModalityError> {
            Ok(match input {
                CounterInput::Add { amount } => CounterUndo::Subtract { amount: *amount },
                CounterInput::Reset if self.value == 0 => CounterUndo::Noop,
                CounterInput::Reset => CounterUndo::RestoreValue { value: self.value },
            })
        }

        fn apply(&mut self, input: CounterInput, _now: DateTime<Utc>) -> Result<(), ModalityError> {
            match input {
                CounterInput::Add { amount } => {
                    self.value = self
                        .value
                        .checked_add(amount)
                        .ok_or_else(|| ModalityError::rejected("counter", "overflow"))?;
                }
                CounterInput::Reset => self.value = 0,
            }
            Ok(())
        }

        fn revert(&mut self, undo: CounterUndo) -> Result<(), UndoError> {
            match undo {
                CounterUndo::Noop => {}
                CounterUndo::Subtract { amount } => self.value -= amount,
                CounterUndo::RestoreValue { value } => self.value = value,
            }
            Ok(())
        }

        fn validate(&self) -> Vec<String> {
            if self.value < 0 {
                vec![format!("negative value {}", self.value)]
            } else {
                Vec::new()
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn counter(value: i64) -> Counter {
        Counter {
            metadata: StateMetadata::new(t0()),
            value,
        }
    }

    fn apply_with_undo(state: &mut dyn ModalityState, input: Value) -> UndoRecord {
        let record = state.create_undo_data(&input).unwrap();
        state.apply_input(&input, t0() + TimeDelta::minutes(1)).unwrap();
        record
    }

    #[test]
    fn apply_bumps_version_and_stamps_time() {
        let mut state = counter(0);
        let dyn_state: &mut dyn ModalityState = &mut state;
        apply_with_undo(dyn_state, json!({"operation": "add", "amount": 3}));
        assert_eq!(state.value, 3);
        assert_eq!(state.metadata.version, 1);
        assert_eq!(state.metadata.last_updated, t0() + TimeDelta::minutes(1));
    }

    #[test]
    fn undo_restores_value_and_metadata_exactly() {
        let mut state = counter(5);
        let before = state.clone();
        let record = apply_with_undo(&mut state, json!({"operation": "reset"}));
        assert_eq!(record.action, "restore_value");
        assert_eq!(record.data["value"], 5);

        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn noop_still_bumps_version_and_reverts() {
        let mut state = counter(0);
        let before = state.clone();
        let record = apply_with_undo(&mut state, json!({"operation": "reset"}));
        assert!(record.is_noop());
        assert!(record.data.is_empty());
        assert_eq!(state.metadata.version, 1);

        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn rejected_input_leaves_metadata_alone() {
        let mut state = counter(i64::MAX);
        let input = json!({"operation": "add", "amount": 1});
        let err = ModalityState::apply_input(&mut state, &input, t0()).unwrap_err();
        assert!(matches!(err, ModalityError::Rejected { .. }));
        assert_eq!(state.metadata.version, 0);
    }

    #[test]
    fn undecodable_input_is_invalid_input() {
        let state = counter(0);
        let err = state
            .create_undo_data(&json!({"operation": "multiply"}))
            .unwrap_err();
        assert!(matches!(err, ModalityError::InvalidInput { .. }));
    }

    #[test]
    fn undo_rejects_foreign_unknown_and_malformed_records() {
        let mut state = counter(1);
        let mut record = state
            .create_undo_data(&json!({"operation": "add", "amount": 1}))
            .unwrap();

        let mut foreign = record.clone();
        foreign.modality_type = "email".into();
        assert!(matches!(
            ModalityState::apply_undo(&mut state, &foreign),
            Err(UndoError::MalformedUndoRecord { .. })
        ));

        let mut unknown = record.clone();
        unknown.action = "explode".into();
        assert!(matches!(
            ModalityState::apply_undo(&mut state, &unknown),
            Err(UndoError::UnknownAction { .. })
        ));

        record.data.remove("amount");
        assert!(matches!(
            ModalityState::apply_undo(&mut state, &record),
            Err(UndoError::MalformedUndoRecord { .. })
        ));
        assert_eq!(state.value, 1);
    }

    #[test]
    fn undo_record_round_trips_through_json() {
        let state = counter(4);
        let record = state.create_undo_data(&json!({"operation": "reset"})).unwrap();
        let text = serde_json::to_string(&record).unwrap();
        let back: UndoRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn restore_rejects_invalid_snapshot() {
        let mut state = counter(2);
        let mut snap = ModalityState::snapshot(&state).unwrap();
        snap["value"] = json!(-7);
        let err = ModalityState::restore(&mut state, &snap).unwrap_err();
        assert!(matches!(err, ModalityError::InvalidSnapshot { .. }));
        assert_eq!(state.value, 2);
    }

    #[test]
    fn boxed_state_downcasts_and_clones() {
        let boxed: Box<dyn ModalityState> = Box::new(counter(9));
        let copy = boxed.clone();
        assert_eq!(copy.downcast_ref::<Counter>().map(|c| c.value), Some(9));
        assert_eq!(copy.modality_type(), "counter");
    }
}
