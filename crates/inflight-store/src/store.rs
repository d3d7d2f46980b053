use crate::event::TransitionEvent;
use crate::status::CallStatus;

/// Store boundary the tracking core emits into.
///
/// `apply` is synchronous by design: the core's ordering guarantees (an
/// observer retaining right after a start cannot miss `Pending`; settlement
/// is folded before the outcome reaches awaiters) depend on an event being
/// folded before control returns to the emitter.
pub trait StatusStore: Send + Sync {
    /// Fold one transition event into the store.
    fn apply(&self, event: &TransitionEvent);

    /// Read-only selector for the current status of an identifier.
    ///
    /// Identifiers without a record read as `NotStarted`.
    fn status_of(&self, id: &str) -> CallStatus;
}
