//! inflight-tracker: Async Call Lifecycle Registry
//!
//! Tracks asynchronous operations in a centralized, observable registry so
//! UI-facing consumers can query their status without holding the operation
//! itself:
//! - Deduplication of concurrent starts sharing an identifier
//! - Retain/release reference counting of observer interest
//! - Delayed, cancellable cleanup of finished records

pub mod config;
pub mod handle;
pub mod id;
pub mod metrics;
pub mod registry;

pub use config::RegistryConfig;
pub use handle::{CallError, CallHandle, CallOutcome};
pub use id::next_call_id;
pub use metrics::CallMetrics;
pub use registry::CallRegistry;

// Re-export store boundary types
pub use inflight_store::{
    CallRecord, CallStatus, MemoryStore, StatusStore, TransitionEvent, TransitionKind,
};
