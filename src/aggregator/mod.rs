// Aggregation worker: daily traffic roll-up for today and yesterday, hourly latency
// down-sampling, snapshot pruning, then the quota check. VACUUM runs on its own schedule
// (cron expression or fixed interval) on the same task, between passes.

pub mod latency;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::billing::day_bounds;
use crate::config::AggregationConfig;
use crate::models::{DailySummary, Scope};
use crate::quota::QuotaMonitor;
use crate::store::MetricsStore;
use latency::{BUCKET_SECS, downsample_bucket, floor_to_bucket};

/// What one pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub summaries_written: usize,
    pub latency_rows_rolled: u64,
    pub snapshots_pruned: u64,
    pub alerts_sent: Vec<u32>,
}

pub struct Aggregator {
    store: Arc<MetricsStore>,
    scopes: Vec<Scope>,
    tz: Tz,
    latency_raw_retention_days: u32,
    quota: Option<Arc<QuotaMonitor>>,
}

impl Aggregator {
    pub fn new(
        store: Arc<MetricsStore>,
        scopes: Vec<Scope>,
        tz: Tz,
        latency_raw_retention_days: u32,
        quota: Option<Arc<QuotaMonitor>>,
    ) -> Self {
        Self {
            store,
            scopes,
            tz,
            latency_raw_retention_days,
            quota,
        }
    }

    /// One aggregation pass at `now`. Every step logs and continues on failure.
    #[instrument(skip(self), fields(operation = "aggregation_pass"))]
    pub async fn run_pass(&self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();
        let today = now.with_timezone(&self.tz).date_naive();
        let yesterday = today.pred_opt().unwrap_or(today);

        for date in [today, yesterday] {
            for scope in &self.scopes {
                match self.summarize_day(date, scope).await {
                    Ok(true) => report.summaries_written += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(error = %e, operation = "summarize_day", date = %date, scope = %scope, "daily summary failed")
                    }
                }
            }
        }

        match self.downsample_latency(now.timestamp()).await {
            Ok(n) => report.latency_rows_rolled = n,
            Err(e) => warn!(error = %e, operation = "downsample_latency", "latency down-sampling failed"),
        }

        let (yesterday_start, _) = day_bounds(yesterday, &self.tz);
        match self.store.prune_traffic_snapshots(yesterday_start).await {
            Ok(n) => report.snapshots_pruned = n,
            Err(e) => warn!(error = %e, operation = "prune_traffic_snapshots", "snapshot prune failed"),
        }

        if let Some(quota) = &self.quota {
            match quota.evaluate(now).await {
                Ok(sent) => report.alerts_sent = sent,
                Err(e) => warn!(error = %e, operation = "quota_evaluate", "quota evaluation failed"),
            }
        }

        report
    }

    /// Upsert max - min of the day's snapshots. Returns false for a day with no traffic.
    async fn summarize_day(&self, date: chrono::NaiveDate, scope: &Scope) -> anyhow::Result<bool> {
        let (from, to) = day_bounds(date, &self.tz);
        let Some(delta) = self.store.traffic_delta(scope, from, to).await? else {
            return Ok(false);
        };
        if delta.is_zero() {
            return Ok(false);
        }
        self.store
            .upsert_daily_summary(&DailySummary {
                date,
                scope: *scope,
                tx_bytes: delta.tx,
                rx_bytes: delta.rx,
            })
            .await?;
        Ok(true)
    }

    /// Roll raw latency rows older than the retention window into hourly rows, one hour per
    /// transaction. Returns the number of raw rows replaced.
    async fn downsample_latency(&self, now_ts: i64) -> anyhow::Result<u64> {
        let retention = i64::from(self.latency_raw_retention_days) * 86_400;
        let cutoff = floor_to_bucket(now_ts - retention);
        let mut rolled = 0u64;

        while let Some(min_ts) = self.store.min_raw_latency_ts_before(cutoff).await? {
            let bucket_start = floor_to_bucket(min_ts);
            let bucket_end = bucket_start + BUCKET_SECS;
            let raw = self
                .store
                .raw_latency_records(bucket_start, bucket_end)
                .await?;
            let aggregated = downsample_bucket(&raw, bucket_start);
            rolled += self
                .store
                .replace_raw_latency_bucket(bucket_start, bucket_end, &aggregated)
                .await?;
        }

        if rolled > 0 {
            info!(raw_rows = rolled, "latency rows rolled into hourly buckets");
        }
        Ok(rolled)
    }
}

/// Runs `run_pass` at startup and then every `interval_secs` until `cancel` fires.
pub fn spawn(
    aggregator: Arc<Aggregator>,
    store: Arc<MetricsStore>,
    config: AggregationConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(aggregator, store, config, cancel).await;
    })
}

#[instrument(skip_all, fields(interval_secs = config.interval_secs))]
async fn run(
    aggregator: Arc<Aggregator>,
    store: Arc<MetricsStore>,
    config: AggregationConfig,
    cancel: CancellationToken,
) {
    let mut pass_interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
    pass_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    let scheduler = tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx, cancel.clone()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = pass_interval.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    report = aggregator.run_pass(Utc::now()) => {
                        debug!(
                            summaries = report.summaries_written,
                            pruned = report.snapshots_pruned,
                            alerts = ?report.alerts_sent,
                            "aggregation pass complete"
                        );
                    }
                }
            }
            Some(()) = vacuum_rx.recv() => {
                if let Err(e) = store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }

    drop(vacuum_rx);
    let _ = scheduler.await;
    debug!("aggregation worker stopped");
}

/// Signals `tx` at each VACUUM time (cron or fixed interval). Cron uses local time.
async fn vacuum_scheduler(
    config: AggregationConfig,
    tx: tokio::sync::mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    let next_delay: Box<dyn Fn() -> Option<Duration> + Send> = match config.vacuum_schedule {
        Some(ref cron_str) => {
            let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
                warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
                return;
            };
            Box::new(move || {
                let now = chrono::Local::now();
                schedule
                    .after(&now)
                    .next()
                    .map(|next| (next - now).to_std().unwrap_or(Duration::from_secs(1)))
            })
        }
        None => {
            let interval = Duration::from_secs(config.vacuum_interval_secs);
            Box::new(move || Some(interval))
        }
    };

    loop {
        let (delay, fire) = match next_delay() {
            Some(delay) => (delay, true),
            None => (Duration::from_secs(3600), false),
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                // A full channel means a VACUUM is already pending.
                if fire && let Err(tokio::sync::mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                    break;
                }
            }
        }
    }
}
