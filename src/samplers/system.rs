use std::sync::Arc;

use tracing::{instrument, warn};

use crate::host_repo::HostRepo;
use crate::models::SystemMetricSample;
use crate::store::MetricsStore;

pub struct SystemSampler {
    host: Arc<HostRepo>,
    store: Arc<MetricsStore>,
    retention_secs: i64,
}

impl SystemSampler {
    pub fn new(host: Arc<HostRepo>, store: Arc<MetricsStore>, retention_secs: u64) -> Self {
        Self {
            host,
            store,
            retention_secs: retention_secs as i64,
        }
    }

    /// Read CPU, memory, root disk and load, write one sample, then prune past the retention window.
    /// A failed write is returned after the prune has run.
    #[instrument(skip(self), fields(sampler = "system", operation = "tick"))]
    pub async fn tick(&self, now: i64) -> anyhow::Result<SystemMetricSample> {
        let cpu_percent = self.host.get_cpu_percent().await?;
        let memory = self.host.get_memory().await?;
        let disk = self.host.get_root_disk().await?;
        let load = self.host.get_load_average();

        let sample = SystemMetricSample {
            ts: now,
            cpu_percent,
            mem_used: memory.used,
            mem_total: memory.total,
            disk_used: disk.used,
            disk_total: disk.total,
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
        };
        let inserted = self.store.insert_system_sample(&sample).await;

        // Retention is enforced whether or not this tick's write went through.
        if let Err(e) = self.store.prune_system_samples(now - self.retention_secs).await {
            warn!(error = %e, operation = "prune_system_samples", "prune failed");
        }
        inserted?;
        Ok(sample)
    }
}
