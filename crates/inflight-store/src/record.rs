use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::CallStatus;

/// Folded per-identifier record of a tracked call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Unique identifier of the tracked call.
    pub id: String,

    /// Current lifecycle status.
    pub status: CallStatus,

    /// Outstanding observer interest.
    pub retain_count: u32,

    /// Failure message, present only while `Rejected`.
    pub error: Option<String>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: CallStatus::NotStarted,
            retain_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status, touching the update timestamp.
    pub fn set_status(&mut self, status: CallStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Touch the update timestamp without a status move.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
