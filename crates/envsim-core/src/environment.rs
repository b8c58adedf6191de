//! The simulated environment: every registered domain object plus the clock.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SimError;
use crate::modality::{Modality, ModalityState};
use crate::time::{SimulatorTime, TimeSnapshot};

/// Serializable image of an [`Environment`].
///
/// Shape: `{ "time": {...}, "modalities": { name: state } }`, with
/// modalities in registration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Clock state.
    pub time: TimeSnapshot,
    /// Per-modality state, keyed by modality type.
    pub modalities: IndexMap<String, Value>,
}

/// Domain state for one simulation run.
///
/// Passive container: event execution mutates it in place, the engine
/// owns it. Each key equals the self-reported
/// [`modality_type`](ModalityState::modality_type) of its state.
#[derive(Clone)]
pub struct Environment {
    modalities: IndexMap<String, Box<dyn ModalityState>>,
    time: SimulatorTime,
}

impl Environment {
    /// Empty environment with a clock starting at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_clock(SimulatorTime::new(start))
    }

    /// Empty environment around an existing clock.
    pub fn with_clock(time: SimulatorTime) -> Self {
        Self {
            modalities: IndexMap::new(),
            time,
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_modality<M: Modality>(mut self, state: M) -> Result<Self, SimError> {
        self.register(Box::new(state))?;
        Ok(self)
    }

    /// Register a domain object under its self-reported name.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] if the name is already taken.
    pub fn register(&mut self, state: Box<dyn ModalityState>) -> Result<(), SimError> {
        let name = state.modality_type().to_string();
        if self.modalities.contains_key(&name) {
            return Err(SimError::invalid(format!(
                "modality '{name}' is already registered"
            )));
        }
        self.modalities.insert(name, state);
        Ok(())
    }

    /// The clock.
    pub fn time(&self) -> &SimulatorTime {
        &self.time
    }

    /// Mutable clock access.
    pub fn time_mut(&mut self) -> &mut SimulatorTime {
        &mut self.time
    }

    /// Current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.time.current_time()
    }

    /// Look up a domain object by name.
    pub fn get(&self, name: &str) -> Option<&dyn ModalityState> {
        self.modalities.get(name).map(|s| s.as_ref())
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn ModalityState + 'static)> {
        self.modalities.get_mut(name).map(|s| s.as_mut())
    }

    /// Lookup that fails with [`SimError::NotFound`].
    pub fn require(&self, name: &str) -> Result<&dyn ModalityState, SimError> {
        self.get(name)
            .ok_or_else(|| SimError::modality_not_found(name))
    }

    /// Typed access to a registered modality.
    pub fn state<M: Modality>(&self) -> Option<&M> {
        self.get(M::MODALITY_TYPE)?.downcast_ref::<M>()
    }

    /// Registered names, in registration order.
    pub fn modality_names(&self) -> impl Iterator<Item = &str> {
        self.modalities.keys().map(String::as_str)
    }

    /// Number of registered domain objects.
    pub fn len(&self) -> usize {
        self.modalities.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.modalities.is_empty()
    }

    /// Capture the clock and every domain object.
    pub fn snapshot(&self) -> Result<EnvironmentSnapshot, SimError> {
        let mut modalities = IndexMap::with_capacity(self.modalities.len());
        for (name, state) in &self.modalities {
            modalities.insert(name.clone(), state.snapshot()?);
        }
        Ok(EnvironmentSnapshot {
            time: self.time.snapshot(),
            modalities,
        })
    }

    /// Replace the clock and the named domain objects from `snapshot`.
    ///
    /// All-or-nothing: every modality is restored into a copy first, and
    /// the environment is only updated once all of them succeeded.
    /// Registered modalities absent from the snapshot are left as they are.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a snapshot entry with no registered
    /// modality, [`SimError::Modality`] if a state fails to decode, and
    /// [`SimError::InvalidOperation`] for an invalid clock snapshot.
    pub fn restore(&mut self, snapshot: &EnvironmentSnapshot) -> Result<(), SimError> {
        let mut time = self.time.clone();
        time.restore(&snapshot.time)?;

        let mut restored = Vec::with_capacity(snapshot.modalities.len());
        for (name, value) in &snapshot.modalities {
            let current = self
                .modalities
                .get(name)
                .ok_or_else(|| SimError::modality_not_found(name.as_str()))?;
            let mut copy = current.clone_state();
            copy.restore(value)?;
            restored.push((name.clone(), copy));
        }

        for (name, state) in restored {
            self.modalities.insert(name, state);
        }
        self.time = time;
        Ok(())
    }

    /// Check the environment's invariants. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.modalities.is_empty() {
            problems.push("no modalities registered".to_string());
        }
        for (name, state) in &self.modalities {
            if state.modality_type() != name {
                problems.push(format!(
                    "modality registered as '{name}' reports type '{}'",
                    state.modality_type()
                ));
            }
            problems.extend(
                state
                    .validate()
                    .into_iter()
                    .map(|p| format!("{name}: {p}")),
            );
        }
        problems.extend(self.time.validate().into_iter().map(|p| format!("time: {p}")));
        problems
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("modalities", &self.modalities.keys().collect::<Vec<_>>())
            .field("current_time", &self.time.current_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModalityError, UndoError};
    use crate::modality::{StateMetadata, UndoAction};
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Notes {
        metadata: StateMetadata,
        lines: Vec<String>,
    }

    #[derive(Deserialize)]
    struct Append {
        line: String,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "action", rename_all = "snake_case")]
    enum NotesUndo {
        Noop,
        Pop,
    }

    impl UndoAction for NotesUndo {
        const ACTIONS: &'static [&'static str] = &["noop", "pop"];
    }

    impl Modality for Notes {
        const MODALITY_TYPE: &'static str = "notes";
        type Input = Append;
        type Undo = NotesUndo;

        fn metadata(&self) -> &StateMetadata {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut StateMetadata {
            &mut self.metadata
        }

        fn capture_undo(&self, _input: &Append) -> Result<NotesUndo, ModalityError> {
            Ok(NotesUndo::Pop)
        }

        fn apply(&mut self, input: Append, _now: DateTime<Utc>) -> Result<(), ModalityError> {
            self.lines.push(input.line);
            Ok(())
        }

        fn revert(&mut self, undo: NotesUndo) -> Result<(), UndoError> {
            if let NotesUndo::Pop = undo {
                self.lines
                    .pop()
                    .ok_or_else(|| UndoError::inconsistent("notes", "no line to remove"))?;
            }
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn notes_env() -> Environment {
        Environment::new(t0())
            .with_modality(Notes {
                metadata: StateMetadata::new(t0()),
                lines: Vec::new(),
            })
            .unwrap()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut env = notes_env();
        let again = Box::new(Notes {
            metadata: StateMetadata::new(t0()),
            lines: vec![],
        });
        assert!(matches!(
            env.register(again),
            Err(SimError::InvalidOperation { .. })
        ));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn require_reports_missing_modality() {
        let env = notes_env();
        assert!(env.require("notes").is_ok());
        assert!(matches!(
            env.require("calendar"),
            Err(SimError::NotFound { kind: "modality", .. })
        ));
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut env = notes_env();
        let snap = env.snapshot().unwrap();

        env.get_mut("notes")
            .unwrap()
            .apply_input(&json!({"line": "hello"}), t0())
            .unwrap();
        env.time_mut().set_time(t0() + TimeDelta::hours(1)).unwrap();
        assert_ne!(env.snapshot().unwrap(), snap);

        env.restore(&snap).unwrap();
        assert_eq!(env.snapshot().unwrap(), snap);
        assert_eq!(env.now(), t0());
    }

    #[test]
    fn snapshot_survives_json() {
        let env = notes_env();
        let snap = env.snapshot().unwrap();
        let text = serde_json::to_string(&snap).unwrap();
        let back: EnvironmentSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snap);
        let value = serde_json::to_value(&snap).unwrap();
        assert!(value["time"]["current_time"].is_string());
        assert!(value["modalities"]["notes"]["lines"].is_array());
    }

    #[test]
    fn restore_is_all_or_nothing() {
        let mut env = notes_env();
        let mut snap = env.snapshot().unwrap();
        let metadata = snap.modalities["notes"]["metadata"].clone();
        snap.modalities["notes"] = json!({"metadata": metadata, "lines": ["kept"]});
        snap.modalities.insert("calendar".into(), json!({}));

        let err = env.restore(&snap).unwrap_err();
        assert!(matches!(err, SimError::NotFound { .. }));
        assert!(env.state::<Notes>().unwrap().lines.is_empty());
    }

    #[test]
    fn validate_flags_empty_environment() {
        let env = Environment::new(t0());
        assert_eq!(env.validate(), vec!["no modalities registered".to_string()]);
        assert!(notes_env().validate().is_empty());
    }

    #[test]
    fn clone_is_deep() {
        let env = notes_env();
        let mut copy = env.clone();
        copy.get_mut("notes")
            .unwrap()
            .apply_input(&json!({"line": "only in copy"}), t0())
            .unwrap();
        assert!(env.state::<Notes>().unwrap().lines.is_empty());
        assert_eq!(copy.state::<Notes>().unwrap().lines.len(), 1);
    }
}
