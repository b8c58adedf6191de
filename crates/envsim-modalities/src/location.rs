//! Device location modality.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use envsim_core::{Modality, ModalityError, StateMetadata, UndoAction, UndoError};

const NAME: &str = "location";

/// Default number of past fixes kept in [`LocationState::history`].
pub const DEFAULT_MAX_HISTORY: usize = 100;

fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), String> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {latitude} outside [-90, 90]"));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {longitude} outside [-180, 180]"));
    }
    Ok(())
}

/// A position fix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Optional human label ("office").
    #[serde(default)]
    pub label: Option<String>,
    /// Virtual time of the fix.
    pub timestamp: DateTime<Utc>,
}

/// A named place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedPlace {
    /// Unique name.
    pub name: String,
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Free-form category.
    #[serde(default)]
    pub category: Option<String>,
}

/// Location state: current fix, bounded history and saved places.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationState {
    /// Version bookkeeping.
    pub metadata: StateMetadata,
    /// Latest fix, if any.
    pub current: Option<Location>,
    /// Every fix in order, oldest first, capped at `max_history`.
    pub history: Vec<Location>,
    /// Saved places in insertion order.
    pub saved_places: IndexMap<String, SavedPlace>,
    /// History cap.
    pub max_history: usize,
}

/// Mutations accepted by [`LocationState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum LocationInput {
    /// Record a new fix.
    Update {
        /// Degrees north.
        latitude: f64,
        /// Degrees east.
        longitude: f64,
        /// Optional label.
        #[serde(default)]
        label: Option<String>,
    },
    /// Add or replace a saved place.
    SavePlace {
        /// Place name.
        name: String,
        /// Degrees north.
        latitude: f64,
        /// Degrees east.
        longitude: f64,
        /// Optional category.
        #[serde(default)]
        category: Option<String>,
    },
    /// Forget a saved place. No-op if absent.
    RemovePlace {
        /// Place name.
        name: String,
    },
}

/// Undo data for [`LocationInput`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LocationUndo {
    /// The input changed nothing.
    Noop,
    /// Drop the newest history entry and put back the previous fix.
    RestoreCurrent {
        /// Fix before the update.
        previous: Option<Location>,
        /// Oldest history entry evicted by the update.
        evicted: Option<Location>,
    },
    /// Delete a place that the input created.
    DeletePlace {
        /// Place name.
        name: String,
    },
    /// Put back a place that the input overwrote.
    ReplacePlace {
        /// Value before the input.
        previous: SavedPlace,
    },
    /// Reinsert a removed place at its former position.
    ReinsertPlace {
        /// Former position.
        index: usize,
        /// The removed place.
        place: SavedPlace,
    },
}

impl UndoAction for LocationUndo {
    const ACTIONS: &'static [&'static str] = &[
        "noop",
        "restore_current",
        "delete_place",
        "replace_place",
        "reinsert_place",
    ];
}

impl LocationState {
    /// No fix yet, default history cap.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self::with_max_history(created, DEFAULT_MAX_HISTORY)
    }

    /// No fix yet, custom history cap.
    pub fn with_max_history(created: DateTime<Utc>, max_history: usize) -> Self {
        Self {
            metadata: StateMetadata::new(created),
            current: None,
            history: Vec::new(),
            saved_places: IndexMap::new(),
            max_history,
        }
    }
}

impl Modality for LocationState {
    const MODALITY_TYPE: &'static str = NAME;
    type Input = LocationInput;
    type Undo = LocationUndo;

    fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut StateMetadata {
        &mut self.metadata
    }

    fn capture_undo(&self, input: &LocationInput) -> Result<LocationUndo, ModalityError> {
        Ok(match input {
            LocationInput::Update { .. } => {
                let evicted = if self.max_history > 0 && self.history.len() >= self.max_history {
                    self.history.first().cloned()
                } else {
                    None
                };
                LocationUndo::RestoreCurrent {
                    previous: self.current.clone(),
                    evicted,
                }
            }
            LocationInput::SavePlace { name, .. } => match self.saved_places.get(name) {
                Some(previous) => LocationUndo::ReplacePlace {
                    previous: previous.clone(),
                },
                None => LocationUndo::DeletePlace { name: name.clone() },
            },
            LocationInput::RemovePlace { name } => match self.saved_places.get_full(name) {
                Some((index, _, place)) => LocationUndo::ReinsertPlace {
                    index,
                    place: place.clone(),
                },
                None => LocationUndo::Noop,
            },
        })
    }

    fn apply(&mut self, input: LocationInput, now: DateTime<Utc>) -> Result<(), ModalityError> {
        match input {
            LocationInput::Update {
                latitude,
                longitude,
                label,
            } => {
                check_coordinates(latitude, longitude)
                    .map_err(|reason| ModalityError::rejected(NAME, reason))?;
                let fix = Location {
                    latitude,
                    longitude,
                    label,
                    timestamp: now,
                };
                if self.max_history > 0 {
                    if self.history.len() >= self.max_history {
                        self.history.remove(0);
                    }
                    self.history.push(fix.clone());
                }
                self.current = Some(fix);
            }
            LocationInput::SavePlace {
                name,
                latitude,
                longitude,
                category,
            } => {
                check_coordinates(latitude, longitude)
                    .map_err(|reason| ModalityError::rejected(NAME, reason))?;
                self.saved_places.insert(
                    name.clone(),
                    SavedPlace {
                        name,
                        latitude,
                        longitude,
                        category,
                    },
                );
            }
            LocationInput::RemovePlace { name } => {
                self.saved_places.shift_remove(&name);
            }
        }
        Ok(())
    }

    fn revert(&mut self, undo: LocationUndo) -> Result<(), UndoError> {
        match undo {
            LocationUndo::Noop => {}
            LocationUndo::RestoreCurrent { previous, evicted } => {
                if self.max_history > 0 && self.history.pop().is_none() {
                    return Err(UndoError::inconsistent(NAME, "history is empty"));
                }
                if let Some(evicted) = evicted {
                    self.history.insert(0, evicted);
                }
                self.current = previous;
            }
            LocationUndo::DeletePlace { name } => {
                if self.saved_places.shift_remove(&name).is_none() {
                    return Err(UndoError::inconsistent(
                        NAME,
                        format!("saved place '{name}' is missing"),
                    ));
                }
            }
            LocationUndo::ReplacePlace { previous } => {
                match self.saved_places.get_mut(&previous.name) {
                    Some(slot) => *slot = previous,
                    None => {
                        return Err(UndoError::inconsistent(
                            NAME,
                            format!("saved place '{}' is missing", previous.name),
                        ))
                    }
                }
            }
            LocationUndo::ReinsertPlace { index, place } => {
                if self.saved_places.contains_key(&place.name) || index > self.saved_places.len()
                {
                    return Err(UndoError::inconsistent(
                        NAME,
                        format!("cannot reinsert '{}' at {index}", place.name),
                    ));
                }
                self.saved_places
                    .shift_insert(index, place.name.clone(), place);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(current) = &self.current {
            if let Err(reason) = check_coordinates(current.latitude, current.longitude) {
                problems.push(format!("current: {reason}"));
            }
        }
        if self.history.len() > self.max_history {
            problems.push(format!(
                "history holds {} fixes, cap is {}",
                self.history.len(),
                self.max_history
            ));
        }
        for (name, place) in &self.saved_places {
            if *name != place.name {
                problems.push(format!("place keyed '{name}' is named '{}'", place.name));
            }
            if let Err(reason) = check_coordinates(place.latitude, place.longitude) {
                problems.push(format!("place '{name}': {reason}"));
            }
        }
        problems
    }
}
