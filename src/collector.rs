// Collector tasks: traffic, system, latency and aggregation each run on their own interval and
// share one cancellation token. `CollectorHandle::shutdown` cancels and joins them all; only then
// may the caller close the store.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{self, Aggregator};
use crate::config::AppConfig;
use crate::host_repo::HostRepo;
use crate::probe::LatencyProbe;
use crate::quota::QuotaMonitor;
use crate::samplers::{LatencySampler, SystemSampler, TrafficSampler};
use crate::sources::TrafficSource;
use crate::store::MetricsStore;

/// Repos and capabilities the collector tasks run against.
pub struct CollectorDeps {
    pub store: Arc<MetricsStore>,
    pub traffic_source: Arc<dyn TrafficSource>,
    pub host: Arc<HostRepo>,
    pub probe: Arc<dyn LatencyProbe>,
    /// `None` when no notifier is configured; the quota check is then skipped.
    pub quota: Option<Arc<QuotaMonitor>>,
}

pub struct CollectorHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CollectorHandle {
    /// Cancel every task and wait for all of them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "collector task ended abnormally");
            }
        }
        debug!("collector tasks stopped");
    }
}

pub fn spawn(deps: CollectorDeps, config: &AppConfig) -> anyhow::Result<CollectorHandle> {
    let CollectorDeps {
        store,
        traffic_source,
        host,
        probe,
        quota,
    } = deps;
    let cancel = CancellationToken::new();
    let stats_every = Duration::from_secs(config.monitoring.stats_log_interval_secs);
    let tz = config.billing.tz()?;

    let traffic = TrafficSampler::new(traffic_source, store.clone(), config.traffic.ports.clone());
    let system = SystemSampler::new(host, store.clone(), config.system.retention_secs);
    let latency = LatencySampler::new(probe, store.clone(), &config.latency);
    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        config.traffic.scopes(),
        tz,
        config.aggregation.latency_raw_retention_days,
        quota,
    ));

    let tasks = vec![
        spawn_traffic(
            traffic,
            Duration::from_secs(config.traffic.sample_interval_secs),
            stats_every,
            cancel.clone(),
        ),
        spawn_system(
            system,
            Duration::from_secs(config.system.sample_interval_secs),
            stats_every,
            cancel.clone(),
        ),
        spawn_latency(
            latency,
            Duration::from_secs(config.latency.interval_secs),
            stats_every,
            cancel.clone(),
        ),
        aggregator::spawn(aggregator, store, config.aggregation.clone(), cancel.clone()),
    ];

    Ok(CollectorHandle { cancel, tasks })
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

/// Stats ticker whose first tick is one period out (no empty stats line at startup).
fn stats_ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

fn spawn_traffic(
    mut sampler: TrafficSampler,
    period: Duration,
    stats_every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sampler.init_offsets() => {}
        }
        let mut tick = ticker(period);
        let mut stats_tick = stats_ticker(stats_every);
        let mut written: u64 = 0;
        let mut skipped: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let report = sampler.tick(Utc::now().timestamp()).await;
                    written += report.written as u64;
                    skipped += report.skipped as u64;
                }
                _ = stats_tick.tick() => {
                    info!(task = "traffic", snapshots_written = written, scopes_skipped = skipped, "collector stats");
                }
            }
        }
        debug!(task = "traffic", "collector task stopped");
    })
}

fn spawn_system(
    sampler: SystemSampler,
    period: Duration,
    stats_every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = ticker(period);
        let mut stats_tick = stats_ticker(stats_every);
        let mut written: u64 = 0;
        let mut failed: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    match sampler.tick(Utc::now().timestamp()).await {
                        Ok(_) => written += 1,
                        Err(e) => {
                            failed += 1;
                            warn!(error = %e, operation = "system_tick", "system sample failed");
                        }
                    }
                }
                _ = stats_tick.tick() => {
                    info!(task = "system", samples_written = written, samples_failed = failed, "collector stats");
                }
            }
        }
        debug!(task = "system", "collector task stopped");
    })
}

fn spawn_latency(
    sampler: LatencySampler,
    period: Duration,
    stats_every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = ticker(period);
        let mut stats_tick = stats_ticker(stats_every);
        let mut rounds: u64 = 0;
        let mut records: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        produced = sampler.run_round(Utc::now().timestamp()) => {
                            rounds += 1;
                            records += produced.len() as u64;
                        }
                    }
                }
                _ = stats_tick.tick() => {
                    info!(task = "latency", rounds, records_written = records, "collector stats");
                }
            }
        }
        debug!(task = "latency", "collector task stopped");
    })
}
