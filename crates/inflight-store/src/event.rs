use serde::{Deserialize, Serialize};

use crate::status::CallStatus;

/// Kind of transition applied to a tracked call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Started,
    Resolved,
    Rejected,
    Finished,
    Clean,
    Reset,
    Retain,
    Release,
}

impl TransitionKind {
    /// Whether this transition is legal from `status` per the lifecycle
    /// table.
    ///
    /// A fresh start is legal from any state except `Pending`; a live call
    /// dedups instead of restarting. `Finished` normally follows
    /// `Resolved`/`Rejected`, and directly from `Pending` it records an
    /// externally cancelled call. Retain, release, and clean are
    /// unconditional.
    pub fn applies_to(&self, status: CallStatus) -> bool {
        match self {
            Self::Started => status != CallStatus::Pending,
            Self::Resolved | Self::Rejected => status == CallStatus::Pending,
            Self::Finished => matches!(
                status,
                CallStatus::Pending | CallStatus::Resolved | CallStatus::Rejected
            ),
            Self::Reset => status.is_terminal(),
            Self::Clean | Self::Retain | Self::Release => true,
        }
    }
}

/// Transition event emitted by the tracking core.
///
/// The store folds these into per-identifier records; it never mutates
/// records through any other path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Identifier of the tracked call.
    pub id: String,
    pub kind: TransitionKind,
    /// Resolved value, present on `Resolved` events.
    pub payload: Option<serde_json::Value>,
    /// Failure message, present on `Rejected` events.
    pub error: Option<String>,
}

impl TransitionEvent {
    fn bare(id: impl Into<String>, kind: TransitionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: None,
            error: None,
        }
    }

    pub fn started(id: impl Into<String>) -> Self {
        Self::bare(id, TransitionKind::Started)
    }

    pub fn resolved(id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            payload: Some(value),
            ..Self::bare(id, TransitionKind::Resolved)
        }
    }

    pub fn rejected(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::bare(id, TransitionKind::Rejected)
        }
    }

    pub fn finished(id: impl Into<String>) -> Self {
        Self::bare(id, TransitionKind::Finished)
    }

    pub fn clean(id: impl Into<String>) -> Self {
        Self::bare(id, TransitionKind::Clean)
    }

    pub fn reset(id: impl Into<String>) -> Self {
        Self::bare(id, TransitionKind::Reset)
    }

    pub fn retain(id: impl Into<String>) -> Self {
        Self::bare(id, TransitionKind::Retain)
    }

    pub fn release(id: impl Into<String>) -> Self {
        Self::bare(id, TransitionKind::Release)
    }
}
