//! Event lifecycle status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a scheduled event.
///
/// ```text
/// Pending ──> Executing ──> Executed
///    │                 └──> Failed
///    ├──> Skipped
///    └──> Cancelled
/// ```
///
/// Every status except `Pending` and `Executing` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Scheduled and waiting for its time.
    Pending,
    /// Currently mutating its target domain object.
    Executing,
    /// Applied successfully.
    Executed,
    /// The mutation raised an error; see the event's error description.
    Failed,
    /// Virtual time jumped past the event without running it.
    Skipped,
    /// Withdrawn before execution.
    Cancelled,
}

impl EventStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [EventStatus; 6] = [
        Self::Pending,
        Self::Executing,
        Self::Executed,
        Self::Failed,
        Self::Skipped,
        Self::Cancelled,
    ];

    /// Whether no further transition is allowed out of this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Executed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
