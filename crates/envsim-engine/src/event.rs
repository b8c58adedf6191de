//! Scheduled events and their execution state machine.
//!
//! A [`SimulatorEvent`] owns its status transitions. Execution delegates
//! the actual mutation to the target domain object through the
//! reversible-mutation contract; failures are recorded on the event and
//! never propagate to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use envsim_core::error::{ExecutionError, SimError};
use envsim_core::{Environment, EventId, EventStatus, UndoRecord};

fn pending() -> EventStatus {
    EventStatus::Pending
}

/// A single scheduled unit of change against one domain object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulatorEvent {
    /// Unique identifier.
    pub id: EventId,
    /// Virtual time at which the event becomes due.
    pub scheduled_time: DateTime<Utc>,
    /// Name of the target domain object.
    pub modality: String,
    /// Mutation payload, decoded by the target.
    pub data: Value,
    /// Creation time; breaks ties between equal-priority events.
    pub created_at: DateTime<Utc>,
    /// Originator of the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Higher executes first among events scheduled at the same instant.
    #[serde(default)]
    pub priority: i32,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "pending")]
    status: EventStatus,
    #[serde(default)]
    executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
}

/// Compact, serializable result of one event's execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    /// The event.
    pub event_id: EventId,
    /// Target domain object.
    pub modality: String,
    /// Status after execution.
    pub status: EventStatus,
    /// When the event was scheduled.
    pub scheduled_time: DateTime<Utc>,
    /// Virtual time of successful execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    /// Failure or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimulatorEvent {
    /// A pending event with a fresh ID, priority 0, created now.
    pub fn new(modality: impl Into<String>, scheduled_time: DateTime<Utc>, data: Value) -> Self {
        Self {
            id: EventId::new(),
            scheduled_time,
            modality: modality.into(),
            data,
            created_at: Utc::now(),
            agent_id: None,
            priority: 0,
            metadata: Map::new(),
            status: EventStatus::Pending,
            executed_at: None,
            error: None,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the originating agent.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the generated ID.
    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    /// Override the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Current lifecycle status.
    pub fn status(&self) -> EventStatus {
        self.status
    }

    /// Virtual time of successful execution.
    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
    }

    /// Failure, skip, or cancellation reason.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the event is pending and due at `now`.
    pub fn can_execute(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Pending && self.scheduled_time <= now
    }

    /// Run the event against `env`.
    ///
    /// On success the event becomes `Executed` and the captured undo
    /// record is returned. On any mutation failure it becomes `Failed`
    /// with the error description and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidTransition`] if the event is not pending.
    pub fn execute(&mut self, env: &mut Environment) -> Result<Option<UndoRecord>, SimError> {
        self.transition(EventStatus::Executing)?;
        match self.apply(env) {
            Ok(record) => {
                self.status = EventStatus::Executed;
                self.executed_at = Some(env.now());
                debug!(
                    event_id = %self.id,
                    modality = %self.modality,
                    scheduled = %self.scheduled_time,
                    action = %record.action,
                    "event executed"
                );
                Ok(Some(record))
            }
            Err(e) => {
                self.status = EventStatus::Failed;
                self.error = Some(e.to_string());
                warn!(
                    event_id = %self.id,
                    modality = %self.modality,
                    error = %e,
                    "event failed"
                );
                Ok(None)
            }
        }
    }

    fn apply(&self, env: &mut Environment) -> Result<UndoRecord, ExecutionError> {
        if !self.data.is_object() {
            return Err(ExecutionError::InvalidPayload {
                reason: format!("expected a JSON object, got {}", value_kind(&self.data)),
            });
        }
        let now = env.now();
        let target = env
            .get_mut(&self.modality)
            .ok_or_else(|| ExecutionError::UnknownTarget {
                modality: self.modality.clone(),
            })?;
        let record = target.create_undo_data(&self.data)?;
        target.apply_input(&self.data, now)?;
        Ok(record)
    }

    /// Mark a pending event as skipped, recording `reason`.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidTransition`] if the event is not pending.
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), SimError> {
        self.transition(EventStatus::Skipped)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Withdraw a pending event, recording `reason`.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidTransition`] if the event is not pending; the
    /// status is left unchanged.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), SimError> {
        self.transition(EventStatus::Cancelled)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Every transition leaves `Pending`.
    fn transition(&mut self, to: EventStatus) -> Result<(), SimError> {
        if self.status != EventStatus::Pending {
            return Err(SimError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Summary of the event's current state.
    pub fn outcome(&self) -> EventOutcome {
        EventOutcome {
            event_id: self.id,
            modality: self.modality.clone(),
            status: self.status,
            scheduled_time: self.scheduled_time,
            executed_at: self.executed_at,
            error: self.error.clone(),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
