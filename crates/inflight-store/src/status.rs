use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Never started, or returned to the default via reset. Identifiers
    /// without a record also read as this status.
    #[default]
    NotStarted,

    /// The call is in flight.
    Pending,

    /// The call settled successfully.
    Resolved,

    /// The call settled with an error.
    Rejected,

    /// Settlement bookkeeping is complete: outcome recorded, cache entry
    /// evicted, cleanup arranged.
    Finished,
}

impl CallStatus {
    /// Statuses a settled call can rest in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected | Self::Finished)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::NotStarted => write!(f, "not_started"),
            CallStatus::Pending => write!(f, "pending"),
            CallStatus::Resolved => write!(f, "resolved"),
            CallStatus::Rejected => write!(f, "rejected"),
            CallStatus::Finished => write!(f, "finished"),
        }
    }
}
