use prometheus::{IntCounter, IntGauge, Registry};

/// Lifecycle metrics for a call registry.
///
/// Each registry carries its own prometheus registry, so independent
/// trackers never collide on series names. Labels are deliberately absent to
/// keep cardinality flat.
#[derive(Clone)]
pub struct CallMetrics {
    calls_started: IntCounter,
    calls_deduped: IntCounter,
    calls_resolved: IntCounter,
    calls_rejected: IntCounter,
    records_swept: IntCounter,
    active_calls: IntGauge,
    registry: Registry,
}

impl CallMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let calls_started = IntCounter::new(
            "inflight_calls_started_total",
            "Total number of tracked calls started",
        )?;
        registry.register(Box::new(calls_started.clone()))?;

        let calls_deduped = IntCounter::new(
            "inflight_calls_deduped_total",
            "Total number of starts that joined an in-flight call",
        )?;
        registry.register(Box::new(calls_deduped.clone()))?;

        let calls_resolved = IntCounter::new(
            "inflight_calls_resolved_total",
            "Total number of tracked calls that resolved",
        )?;
        registry.register(Box::new(calls_resolved.clone()))?;

        let calls_rejected = IntCounter::new(
            "inflight_calls_rejected_total",
            "Total number of tracked calls that rejected",
        )?;
        registry.register(Box::new(calls_rejected.clone()))?;

        let records_swept = IntCounter::new(
            "inflight_records_swept_total",
            "Total number of finished records removed by the delayed sweep",
        )?;
        registry.register(Box::new(records_swept.clone()))?;

        let active_calls = IntGauge::new(
            "inflight_active_calls",
            "Number of calls currently in flight",
        )?;
        registry.register(Box::new(active_calls.clone()))?;

        Ok(Self {
            calls_started,
            calls_deduped,
            calls_resolved,
            calls_rejected,
            records_swept,
            active_calls,
            registry,
        })
    }

    pub(crate) fn call_started(&self) {
        self.calls_started.inc();
        self.active_calls.inc();
    }

    pub(crate) fn call_deduped(&self) {
        self.calls_deduped.inc();
    }

    pub(crate) fn call_resolved(&self) {
        self.calls_resolved.inc();
    }

    pub(crate) fn call_rejected(&self) {
        self.calls_rejected.inc();
    }

    pub(crate) fn call_finished(&self) {
        self.active_calls.dec();
    }

    pub(crate) fn record_swept(&self) {
        self.records_swept.inc();
    }

    pub fn started(&self) -> u64 {
        self.calls_started.get()
    }

    pub fn deduped(&self) -> u64 {
        self.calls_deduped.get()
    }

    pub fn resolved(&self) -> u64 {
        self.calls_resolved.get()
    }

    pub fn rejected(&self) -> u64 {
        self.calls_rejected.get()
    }

    pub fn swept(&self) -> u64 {
        self.records_swept.get()
    }

    pub fn active(&self) -> i64 {
        self.active_calls.get()
    }

    /// Prometheus registry for scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new().expect("failed to build call metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_counters_move_independently() {
        let metrics = CallMetrics::default();

        metrics.call_started();
        metrics.call_started();
        metrics.call_deduped();
        metrics.call_resolved();
        metrics.call_finished();

        assert_eq!(metrics.started(), 2);
        assert_eq!(metrics.deduped(), 1);
        assert_eq!(metrics.resolved(), 1);
        assert_eq!(metrics.active(), 1);
        assert_eq!(metrics.rejected(), 0);
        assert_eq!(metrics.swept(), 0);
    }

    #[test]
    fn series_register_without_collisions() {
        let a = CallMetrics::default();
        let b = CallMetrics::default();
        assert_eq!(a.registry().gather().len(), 6);
        assert_eq!(b.registry().gather().len(), 6);
    }
}
