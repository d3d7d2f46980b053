use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::{TransitionEvent, TransitionKind};
use crate::record::CallRecord;
use crate::status::CallStatus;
use crate::store::StatusStore;

/// Buffer size for the applied-event broadcast channel.
const EVENT_CAPACITY: usize = 1024;

/// Reference in-memory status store.
///
/// Folds transition events into per-identifier records and re-broadcasts
/// every applied event to subscribers. Events that are illegal for the
/// record's current status are logged and dropped without being broadcast.
pub struct MemoryStore {
    records: Mutex<HashMap<String, CallRecord>>,
    events: broadcast::Sender<TransitionEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to applied transition events.
    ///
    /// Subscribers receive events in the order they were folded.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of a single record.
    pub fn record(&self, id: &str) -> Option<CallRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    /// Snapshot of all records.
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore for MemoryStore {
    fn apply(&self, event: &TransitionEvent) {
        let mut records = self.records.lock().unwrap();

        let current = records
            .get(&event.id)
            .map(|record| record.status)
            .unwrap_or_default();
        if !event.kind.applies_to(current) {
            warn!(id = %event.id, from = %current, kind = ?event.kind, "illegal transition dropped");
            return;
        }

        match event.kind {
            TransitionKind::Started => {
                let record = records
                    .entry(event.id.clone())
                    .or_insert_with(|| CallRecord::new(event.id.as_str()));
                record.error = None;
                record.set_status(CallStatus::Pending);
            }
            TransitionKind::Resolved => {
                if let Some(record) = records.get_mut(&event.id) {
                    record.set_status(CallStatus::Resolved);
                }
            }
            TransitionKind::Rejected => {
                if let Some(record) = records.get_mut(&event.id) {
                    record.error = event.error.clone();
                    record.set_status(CallStatus::Rejected);
                }
            }
            TransitionKind::Finished => {
                if let Some(record) = records.get_mut(&event.id) {
                    record.set_status(CallStatus::Finished);
                }
            }
            TransitionKind::Reset => {
                if let Some(record) = records.get_mut(&event.id) {
                    record.error = None;
                    record.set_status(CallStatus::NotStarted);
                }
            }
            TransitionKind::Clean => {
                if records.remove(&event.id).is_none() {
                    debug!(id = %event.id, "clean for an unknown id");
                }
            }
            TransitionKind::Retain => {
                // Interest can be registered before the call ever starts.
                let record = records
                    .entry(event.id.clone())
                    .or_insert_with(|| CallRecord::new(event.id.as_str()));
                record.retain_count += 1;
                record.touch();
            }
            TransitionKind::Release => match records.get_mut(&event.id) {
                Some(record) if record.retain_count > 0 => {
                    record.retain_count -= 1;
                    record.touch();
                }
                _ => {
                    warn!(id = %event.id, "release with no outstanding retain");
                    return;
                }
            },
        }

        drop(records);
        let _ = self.events.send(event.clone());
    }

    fn status_of(&self, id: &str) -> CallStatus {
        self.records
            .lock()
            .unwrap()
            .get(id)
            .map(|record| record.status)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_id_reads_not_started() {
        let store = MemoryStore::new();
        assert_eq!(store.status_of("ghost"), CallStatus::NotStarted);
        assert!(store.record("ghost").is_none());
    }

    #[test]
    fn started_creates_a_pending_record() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::started("job-1"));
        assert_eq!(store.status_of("job-1"), CallStatus::Pending);

        let record = store.record("job-1").unwrap();
        assert_eq!(record.retain_count, 0);
        assert!(record.error.is_none());
    }

    #[test]
    fn full_success_path() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::started("job-1"));
        store.apply(&TransitionEvent::resolved("job-1", json!({"name": "Ana"})));
        assert_eq!(store.status_of("job-1"), CallStatus::Resolved);
        store.apply(&TransitionEvent::finished("job-1"));
        assert_eq!(store.status_of("job-1"), CallStatus::Finished);
    }

    #[test]
    fn rejection_records_the_error() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::started("job-1"));
        store.apply(&TransitionEvent::rejected("job-1", "boom"));

        let record = store.record("job-1").unwrap();
        assert_eq!(record.status, CallStatus::Rejected);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn reset_clears_error_and_status() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::started("job-1"));
        store.apply(&TransitionEvent::rejected("job-1", "boom"));
        store.apply(&TransitionEvent::finished("job-1"));
        store.apply(&TransitionEvent::reset("job-1"));

        let record = store.record("job-1").unwrap();
        assert_eq!(record.status, CallStatus::NotStarted);
        assert!(record.error.is_none());
    }

    #[test]
    fn illegal_transitions_leave_the_record_unchanged() {
        let store = MemoryStore::new();

        // Settlement without a pending call.
        store.apply(&TransitionEvent::resolved("job-1", json!(1)));
        assert!(store.record("job-1").is_none());

        // Reset while in flight.
        store.apply(&TransitionEvent::started("job-1"));
        store.apply(&TransitionEvent::reset("job-1"));
        assert_eq!(store.status_of("job-1"), CallStatus::Pending);

        // Restart of a live call.
        store.apply(&TransitionEvent::started("job-1"));
        assert_eq!(store.status_of("job-1"), CallStatus::Pending);
    }

    #[test]
    fn restart_of_a_settled_record_is_legal() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::started("job-1"));
        store.apply(&TransitionEvent::rejected("job-1", "boom"));
        store.apply(&TransitionEvent::finished("job-1"));

        store.apply(&TransitionEvent::started("job-1"));
        let record = store.record("job-1").unwrap();
        assert_eq!(record.status, CallStatus::Pending);
        assert!(record.error.is_none());
    }

    #[test]
    fn retain_before_start_creates_a_record() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::retain("job-1"));

        let record = store.record("job-1").unwrap();
        assert_eq!(record.status, CallStatus::NotStarted);
        assert_eq!(record.retain_count, 1);
    }

    #[test]
    fn release_floors_at_zero() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::retain("job-1"));
        store.apply(&TransitionEvent::release("job-1"));
        store.apply(&TransitionEvent::release("job-1"));

        assert_eq!(store.record("job-1").unwrap().retain_count, 0);
    }

    #[test]
    fn clean_removes_the_record() {
        let store = MemoryStore::new();
        store.apply(&TransitionEvent::started("job-1"));
        store.apply(&TransitionEvent::clean("job-1"));
        assert!(store.record("job-1").is_none());
        assert_eq!(store.status_of("job-1"), CallStatus::NotStarted);
    }

    #[tokio::test]
    async fn subscribers_see_applied_events_in_order() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        store.apply(&TransitionEvent::started("job-1"));
        // Illegal, dropped: must not reach subscribers.
        store.apply(&TransitionEvent::reset("job-1"));
        store.apply(&TransitionEvent::resolved("job-1", json!(1)));
        store.apply(&TransitionEvent::finished("job-1"));

        let kinds = [
            events.try_recv().unwrap().kind,
            events.try_recv().unwrap().kind,
            events.try_recv().unwrap().kind,
        ];
        assert_eq!(
            kinds,
            [
                TransitionKind::Started,
                TransitionKind::Resolved,
                TransitionKind::Finished,
            ]
        );
        assert!(events.try_recv().is_err());
    }
}
