use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::models::{CounterReading, Scope, TrafficSnapshot};
use crate::reconciler::CounterReconciler;
use crate::sources::TrafficSource;
use crate::store::MetricsStore;

/// Outcome of one traffic tick: scopes written and scopes skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficTickReport {
    pub written: usize,
    pub skipped: usize,
}

/// Reads host and per-port counters, reconciles them and writes one snapshot per readable scope.
/// Owns the reconciler; only the traffic task touches it.
pub struct TrafficSampler {
    source: Arc<dyn TrafficSource>,
    store: Arc<MetricsStore>,
    ports: Vec<u16>,
    reconciler: CounterReconciler,
    last_ts: i64,
}

impl TrafficSampler {
    pub fn new(source: Arc<dyn TrafficSource>, store: Arc<MetricsStore>, ports: Vec<u16>) -> Self {
        Self {
            source,
            store,
            ports,
            reconciler: CounterReconciler::new(),
            last_ts: 0,
        }
    }

    pub fn reconciler(&self) -> &CounterReconciler {
        &self.reconciler
    }

    /// Seed offsets for every scope readable right now. Scopes that fail here are seeded on
    /// their first successful read.
    #[instrument(skip(self), fields(sampler = "traffic", operation = "init_offsets"))]
    pub async fn init_offsets(&mut self) {
        match self.source.read_host().await {
            Ok(raw) => {
                self.ensure_seeded(Scope::Total, &raw).await;
            }
            Err(e) => warn!(error = %e, operation = "read_host", "host counters unreadable at startup"),
        }
        if self.ports.is_empty() {
            return;
        }
        match self.source.read_ports(&self.ports).await {
            Ok(readings) => {
                for port in self.ports.clone() {
                    if let Some(raw) = readings.get(&port).cloned().flatten() {
                        self.ensure_seeded(Scope::Port(port), &raw).await;
                    }
                }
            }
            Err(e) => warn!(error = %e, operation = "read_ports", "port counters unreadable at startup"),
        }
    }

    /// One sampling pass at `now` (unix seconds).
    pub async fn tick(&mut self, now: i64) -> TrafficTickReport {
        let mut report = TrafficTickReport::default();

        match self.source.read_host().await {
            Ok(raw) => report.count(self.record(Scope::Total, raw, now).await),
            Err(e) => {
                warn!(error = %e, operation = "read_host", "host counters unreadable");
                report.skipped += 1;
            }
        }

        if self.ports.is_empty() {
            return report;
        }
        let ports = self.ports.clone();
        match self.source.read_ports(&ports).await {
            Ok(readings) => {
                for port in ports {
                    match readings.get(&port).cloned().flatten() {
                        Some(raw) => report.count(self.record(Scope::Port(port), raw, now).await),
                        None => {
                            debug!(port, "no accounting rule for port");
                            report.skipped += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, operation = "read_ports", "port counters unreadable");
                report.skipped += ports.len();
            }
        }
        report
    }

    /// Reconcile and write one scope. The reconciler advances even when the write fails, so the
    /// next stored value still accounts for this reading.
    async fn record(&mut self, scope: Scope, raw: CounterReading, now: i64) -> bool {
        if !self.ensure_seeded(scope, &raw).await {
            return false;
        }
        // Seeding may have raised last_ts from the store.
        let ts = now.max(self.last_ts);
        self.last_ts = ts;
        let counters = self.reconciler.reconcile(&scope, raw);
        let snapshot = TrafficSnapshot {
            ts,
            scope,
            tx_bytes: counters.tx,
            rx_bytes: counters.rx,
        };
        match self.store.insert_traffic_snapshot(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, operation = "insert_traffic_snapshot", scope = %scope, "snapshot dropped");
                false
            }
        }
    }

    /// Seed `scope` from the latest stored snapshot. Returns false (and leaves the scope unseeded)
    /// when the store lookup fails, so the next tick retries instead of writing a drop.
    async fn ensure_seeded(&mut self, scope: Scope, raw: &CounterReading) -> bool {
        if self.reconciler.is_tracking(&scope) {
            return true;
        }
        match self.store.latest_traffic_snapshot(&scope).await {
            Ok(stored) => {
                if let Some(s) = &stored {
                    self.last_ts = self.last_ts.max(s.ts);
                }
                self.reconciler
                    .seed(&scope, raw.clone(), stored.as_ref().map(TrafficSnapshot::counters));
                debug!(scope = %scope, restored = stored.is_some(), "counter offsets seeded");
                true
            }
            Err(e) => {
                warn!(error = %e, operation = "latest_traffic_snapshot", scope = %scope, "seeding postponed");
                false
            }
        }
    }
}

impl TrafficTickReport {
    fn count(&mut self, written: bool) {
        if written {
            self.written += 1;
        } else {
            self.skipped += 1;
        }
    }
}
