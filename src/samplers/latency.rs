use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, instrument, warn};

use crate::config::LatencyConfig;
use crate::models::{LatencyRecord, PingTarget, ProbeResult};
use crate::probe::{LatencyProbe, resolve};
use crate::store::MetricsStore;

pub struct LatencySampler {
    probe: Arc<dyn LatencyProbe>,
    store: Arc<MetricsStore>,
    targets: Vec<PingTarget>,
    count: u32,
    timeout: Duration,
    gap: Duration,
}

impl LatencySampler {
    pub fn new(probe: Arc<dyn LatencyProbe>, store: Arc<MetricsStore>, config: &LatencyConfig) -> Self {
        Self {
            probe,
            store,
            targets: config.targets.clone(),
            count: config.count,
            timeout: Duration::from_millis(config.timeout_ms),
            gap: Duration::from_millis(config.gap_ms),
        }
    }

    /// Probe every target concurrently and write one raw record each. Returns the records produced.
    #[instrument(skip(self), fields(sampler = "latency", targets = self.targets.len()))]
    pub async fn run_round(&self, now: i64) -> Vec<LatencyRecord> {
        let results = join_all(self.targets.iter().map(|t| self.probe_target(t))).await;

        let mut records = Vec::with_capacity(results.len());
        for (target, result) in self.targets.iter().zip(results) {
            let record = LatencyRecord {
                ts: now,
                target: target.tag.clone(),
                rtt_ms: result.avg_rtt_ms,
                sent: result.sent,
                lost: result.lost,
                is_aggregated: false,
            };
            if let Err(e) = self.store.insert_latency_record(&record).await {
                warn!(error = %e, operation = "insert_latency_record", target = %target.tag, "latency record dropped");
            }
            records.push(record);
        }
        records
    }

    async fn probe_target(&self, target: &PingTarget) -> ProbeResult {
        let addr = match resolve(&target.addr).await {
            Ok(addr) => addr,
            Err(e) => {
                debug!(error = %e, target = %target.tag, "target did not resolve");
                return ProbeResult::total_loss(self.count);
            }
        };
        self.probe
            .probe(addr, self.count, self.timeout, self.gap)
            .await
    }
}
