use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use inflight_store::{CallStatus, StatusStore, TransitionEvent};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::handle::{CallError, CallHandle, CallOutcome};
use crate::id::next_call_id;
use crate::metrics::CallMetrics;

/// Registry tracking the lifecycle of asynchronous calls.
///
/// Each tracked call moves through the status store via transition events:
/// `started` when the work is launched, `resolved`/`rejected` when it
/// settles, `finished` once settlement bookkeeping is done, and `clean` when
/// the record is removed, either by the delayed sweep or immediately when
/// the last retaining observer releases a settled call.
///
/// The registry is an explicit object: clone it freely, pass it by
/// reference, build one per test. All mutation happens synchronously under
/// one lock; the only suspension point is the tracked work itself.
#[derive(Clone)]
pub struct CallRegistry {
    shared: Arc<RegistryShared>,
}

struct RegistryShared {
    store: Arc<dyn StatusStore>,
    config: RegistryConfig,
    metrics: Arc<CallMetrics>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// In-flight calls, keyed by id. An entry exists iff the store reports
    /// the id as pending.
    calls: HashMap<String, InFlight>,

    /// Ids whose call has settled but whose record has not been cleaned.
    settled: HashSet<String>,

    /// Outstanding observer interest per id. Entries exist only while the
    /// count is positive.
    retained: HashMap<String, u32>,

    /// Armed sweep timers, at most one per id.
    sweeps: HashMap<String, Sweep>,

    /// Fences stale work: a settlement or a fired timer only acts if its
    /// epoch still matches the live entry.
    next_epoch: u64,
}

struct InFlight {
    handle: CallHandle,
    epoch: u64,
}

struct Sweep {
    task: JoinHandle<()>,
    epoch: u64,
}

fn count(inner: &Inner, id: &str) -> u32 {
    inner.retained.get(id).copied().unwrap_or(0)
}

impl CallRegistry {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self::with_config(store, RegistryConfig::default())
    }

    pub fn with_config(store: Arc<dyn StatusStore>, config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                store,
                config,
                metrics: Arc::new(CallMetrics::default()),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Track a unit of deferred work.
    ///
    /// Resolves the identifier (generating one when absent) and either joins
    /// an already-pending call under the same id or starts a fresh one. The
    /// `started` transition is applied before the thunk is invoked and
    /// before its future is spawned, so an observer retaining right after
    /// this call cannot miss `Pending`. The thunk runs under the registry
    /// lock and must only construct its future.
    ///
    /// # Panics
    ///
    /// Panics if the store reports the id as pending while the call cache
    /// has no entry for it: the two stores have desynchronized and
    /// continuing would hand out a dead handle.
    pub fn start<W, F>(&self, work: W, id: Option<&str>) -> CallHandle
    where
        W: FnOnce() -> F,
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let id = id.map(str::to_owned).unwrap_or_else(next_call_id);
        let mut inner = self.shared.inner.lock().unwrap();

        if let Some(handle) = self.shared.join_pending(&inner, &id) {
            debug!(id = %id, "joining in-flight call");
            return handle;
        }

        let epoch = self.shared.begin(&mut inner, &id);
        self.shared.commit(&mut inner, &id, epoch, work().boxed())
    }

    /// Track an operation that is already running.
    ///
    /// Prefer [`start`](Self::start) with a thunk: a thunk lets the dedup
    /// check avoid launching redundant work, while an already-started
    /// operation cannot be un-started. If the id is already pending, the
    /// duplicate is detached so it still runs to completion, but its outcome
    /// is not tracked and the cached handle is returned instead.
    ///
    /// # Panics
    ///
    /// Same desynchronization condition as [`start`](Self::start).
    pub fn adopt<F>(&self, fut: F, id: Option<&str>) -> CallHandle
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let id = id.map(str::to_owned).unwrap_or_else(next_call_id);
        let mut inner = self.shared.inner.lock().unwrap();

        if let Some(handle) = self.shared.join_pending(&inner, &id) {
            warn!(id = %id, "already-started operation for a pending id; duplicate runs untracked");
            tokio::spawn(async move {
                let _ = fut.await;
            });
            return handle;
        }

        let epoch = self.shared.begin(&mut inner, &id);
        self.shared.commit(&mut inner, &id, epoch, fut.boxed())
    }

    /// Register observer interest in an identifier.
    ///
    /// Valid at any time, including before the call has started: an
    /// observer can declare interest first and trigger the call after.
    pub fn retain(&self, id: &str) {
        let mut inner = self.shared.inner.lock().unwrap();
        let entry = inner.retained.entry(id.to_owned()).or_insert(0);
        *entry += 1;
        let count = *entry;
        self.shared.store.apply(&TransitionEvent::retain(id));
        debug!(id = %id, count, "call retained");
    }

    /// Drop observer interest in an identifier, floored at zero.
    ///
    /// When the last observer departs from a settled call, the record is
    /// cleaned immediately instead of waiting for the delayed sweep.
    pub fn release(&self, id: &str) {
        let mut inner = self.shared.inner.lock().unwrap();
        let count = match inner.retained.get_mut(id) {
            Some(entry) if *entry > 0 => {
                *entry -= 1;
                *entry
            }
            _ => {
                warn!(id = %id, "release without matching retain");
                return;
            }
        };
        if count == 0 {
            inner.retained.remove(id);
        }
        self.shared.store.apply(&TransitionEvent::release(id));
        debug!(id = %id, count, "call released");

        if count == 0 && inner.settled.contains(id) {
            debug!(id = %id, "last observer departed; cleaning settled record");
            self.shared.clean_locked(&mut inner, id);
        }
    }

    /// Reset a settled record back to `NotStarted`.
    ///
    /// Clears the recorded error and cancels any armed sweep for the id.
    /// Retain counts are untouched: reference counting tracks observer
    /// interest, not call outcome.
    pub fn reset(&self, id: &str) {
        let mut inner = self.shared.inner.lock().unwrap();
        if !inner.settled.remove(id) {
            warn!(id = %id, "reset ignored; call has not settled");
            return;
        }
        if let Some(sweep) = inner.sweeps.remove(id) {
            sweep.task.abort();
        }
        self.shared.store.apply(&TransitionEvent::reset(id));
        info!(id = %id, "call reset");
    }

    /// Drive `finished` directly for a pending call.
    ///
    /// This is the hook for externally cancelled operations. The underlying
    /// work is not cancelled: its eventual outcome still reaches awaiters of
    /// the handle, but the registry discards it.
    pub fn finish(&self, id: &str) {
        let mut inner = self.shared.inner.lock().unwrap();
        if !inner.calls.contains_key(id) {
            warn!(id = %id, "finish ignored; no call in flight");
            return;
        }
        self.shared.finish_locked(&mut inner, id);
        info!(id = %id, "call finished without settling");
    }

    /// Remove an identifier's record, cache entry, timer, and retain
    /// bookkeeping immediately, regardless of retain count.
    ///
    /// An explicit override, invoked by the sweep itself and by tests;
    /// callers are expected to know that no observer still needs the id.
    pub fn clean(&self, id: &str) {
        let mut inner = self.shared.inner.lock().unwrap();
        self.shared.clean_locked(&mut inner, id);
        info!(id = %id, "record cleaned");
    }

    /// Current observer count for an identifier.
    pub fn retain_count(&self, id: &str) -> u32 {
        count(&self.shared.inner.lock().unwrap(), id)
    }

    /// Ids with a call currently in flight.
    pub fn active_ids(&self) -> Vec<String> {
        self.shared.inner.lock().unwrap().calls.keys().cloned().collect()
    }

    /// Lifecycle metrics for this registry.
    pub fn metrics(&self) -> Arc<CallMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Abort all armed sweeps and drop registry bookkeeping.
    ///
    /// Records already folded into the store are left as they are; no
    /// further cleanup runs for them.
    pub fn shutdown(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        for (_, sweep) in inner.sweeps.drain() {
            sweep.task.abort();
        }
        inner.calls.clear();
        inner.settled.clear();
        inner.retained.clear();
        info!("call registry shut down");
    }
}

impl RegistryShared {
    /// Dedup check: a pending id joins the in-flight call.
    ///
    /// This is the one place the store is read: exactly once per
    /// start/adopt.
    fn join_pending(&self, inner: &Inner, id: &str) -> Option<CallHandle> {
        if self.store.status_of(id) != CallStatus::Pending {
            return None;
        }
        let Some(call) = inner.calls.get(id) else {
            panic!("status store reports {id} pending but the call cache has no entry; stores have desynchronized");
        };
        self.metrics.call_deduped();
        Some(call.handle.clone())
    }

    /// Fresh-start bookkeeping: cancel any armed sweep, forget prior
    /// settlement, apply `started`. Runs before the work future exists, so
    /// `Pending` is observable before any continuation can.
    fn begin(&self, inner: &mut Inner, id: &str) -> u64 {
        if let Some(sweep) = inner.sweeps.remove(id) {
            sweep.task.abort();
            debug!(id = %id, "cancelled pending sweep; identifier reused");
        }
        inner.settled.remove(id);
        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        self.store.apply(&TransitionEvent::started(id));
        self.metrics.call_started();
        epoch
    }

    fn commit(
        self: &Arc<Self>,
        inner: &mut Inner,
        id: &str,
        epoch: u64,
        fut: BoxFuture<'static, anyhow::Result<Value>>,
    ) -> CallHandle {
        let handle = self.drive(id, epoch, fut);
        inner.calls.insert(
            id.to_owned(),
            InFlight {
                handle: handle.clone(),
                epoch,
            },
        );
        info!(id = %id, "call started");
        handle
    }

    /// Spawn the driver for a fresh call and build its shared handle.
    fn drive(
        self: &Arc<Self>,
        id: &str,
        epoch: u64,
        fut: BoxFuture<'static, anyhow::Result<Value>>,
    ) -> CallHandle {
        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(self);
        let call_id = id.to_owned();
        tokio::spawn(async move {
            let outcome = match fut.await {
                Ok(value) => Ok(value),
                Err(err) => Err(CallError::Failed(Arc::new(err))),
            };
            match weak.upgrade() {
                Some(shared) => shared.settle(&call_id, epoch, &outcome),
                None => debug!(id = %call_id, "registry gone before call settled"),
            }
            // Awaiters observe the outcome only after settlement is folded.
            let _ = tx.send(outcome);
        });

        let outcome = rx
            .map(|received| received.unwrap_or(Err(CallError::Detached)))
            .boxed();
        CallHandle::new(id, outcome)
    }

    /// Fold a call's settlement: outcome transition, `finished`, cache
    /// eviction, and sweep arming, atomically with respect to the registry.
    fn settle(self: &Arc<Self>, id: &str, epoch: u64, outcome: &CallOutcome) {
        let mut inner = self.inner.lock().unwrap();
        let live = inner.calls.get(id).is_some_and(|call| call.epoch == epoch);
        if !live {
            debug!(id = %id, "late settlement for a call no longer tracked");
            return;
        }
        match outcome {
            Ok(value) => {
                self.store.apply(&TransitionEvent::resolved(id, value.clone()));
                self.metrics.call_resolved();
                info!(id = %id, "call resolved");
            }
            Err(err) => {
                let message = match err {
                    CallError::Failed(cause) => cause.to_string(),
                    other => other.to_string(),
                };
                self.store.apply(&TransitionEvent::rejected(id, message));
                self.metrics.call_rejected();
                warn!(id = %id, error = %err, "call rejected");
            }
        }
        self.finish_locked(&mut inner, id);
    }

    fn finish_locked(self: &Arc<Self>, inner: &mut Inner, id: &str) {
        self.store.apply(&TransitionEvent::finished(id));
        inner.calls.remove(id);
        inner.settled.insert(id.to_owned());
        self.metrics.call_finished();
        if count(inner, id) == 0 {
            self.arm_sweep(inner, id);
        } else {
            debug!(id = %id, count = count(inner, id), "call finished while retained; cleanup deferred");
        }
    }

    /// Arm the delayed sweep for a finished, unretained record. Re-arming is
    /// idempotent: any previous timer for the id is cancelled first.
    fn arm_sweep(self: &Arc<Self>, inner: &mut Inner, id: &str) {
        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        let delay = self.config.sweep_delay;
        let weak = Arc::downgrade(self);
        let sweep_id = id.to_owned();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.sweep(&sweep_id, epoch);
            }
        });
        if let Some(old) = inner.sweeps.insert(id.to_owned(), Sweep { task, epoch }) {
            old.task.abort();
        }
        debug!(id = %id, delay_ms = delay.as_millis() as u64, "sweep armed");
    }

    fn sweep(self: &Arc<Self>, id: &str, epoch: u64) {
        let mut inner = self.inner.lock().unwrap();
        // An abort only lands at an await point; a timer that already woke
        // and was waiting on the lock is fenced out here instead.
        if inner.sweeps.get(id).map(|sweep| sweep.epoch) != Some(epoch) {
            return;
        }
        inner.sweeps.remove(id);
        if count(&inner, id) > 0 {
            debug!(id = %id, "sweep skipped; call was retained while the timer slept");
            return;
        }
        if !inner.settled.contains(id) {
            return;
        }
        self.clean_locked(&mut inner, id);
        self.metrics.record_swept();
        debug!(id = %id, "finished record swept");
    }

    fn clean_locked(&self, inner: &mut Inner, id: &str) {
        if let Some(sweep) = inner.sweeps.remove(id) {
            sweep.task.abort();
        }
        if inner.calls.remove(id).is_some() {
            // Still in flight; the late outcome will be discarded.
            self.metrics.call_finished();
        }
        inner.settled.remove(id);
        inner.retained.remove(id);
        self.store.apply(&TransitionEvent::clean(id));
    }
}

impl Drop for RegistryShared {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut() {
            for (_, sweep) in inner.sweeps.drain() {
                sweep.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflight_store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn generated_ids_ride_on_the_handle() {
        let store = Arc::new(MemoryStore::new());
        let registry = CallRegistry::new(store.clone());

        let handle = registry.start(|| async { Ok(json!(1)) }, None);
        assert!(handle.id().starts_with("call-"));
        assert_eq!(store.status_of(handle.id()), CallStatus::Pending);
    }

    #[tokio::test]
    #[should_panic(expected = "desynchronized")]
    async fn pending_status_without_cache_entry_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let registry = CallRegistry::new(store.clone());

        // Forge a pending record behind the registry's back.
        store.apply(&TransitionEvent::started("job-1"));
        registry.start(|| async { Ok(json!(1)) }, Some("job-1"));
    }
}
