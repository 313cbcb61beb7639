// Read-only views over the store for a dashboard or API layer. Nothing here writes.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::Serialize;

use crate::billing::{BillingMode, billing_cycle, cycle_usage, day_bounds};
use crate::config::BillingConfig;
use crate::models::{CounterPair, DailySummary, Scope, SystemMetricSample};
use crate::quota::BYTES_PER_GB;
use crate::sources::iptables;
use crate::store::MetricsStore;

/// Latency bucket widths offered to charts, in minutes.
const LATENCY_STEPS_MINUTES: [u32; 14] = [1, 2, 3, 5, 10, 15, 30, 60, 120, 180, 240, 360, 720, 1440];
const TARGET_POINTS: i64 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub tx: u64,
    pub rx: u64,
    pub total: u64,
    /// Bytes that count toward the quota under the configured billing mode.
    pub billed: u64,
}

impl Usage {
    fn new(pair: CounterPair, mode: BillingMode) -> Self {
        Self {
            tx: pair.tx,
            rx: pair.rx,
            total: pair.tx.saturating_add(pair.rx),
            billed: mode.used(pair),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficOverview {
    pub scope: Scope,
    pub today: Usage,
    pub yesterday: Usage,
    pub cycle: Usage,
    pub last_month: Usage,
    pub cycle_start: NaiveDate,
    pub cycle_end: NaiveDate,
    pub days_remaining: i64,
    pub limit_bytes: u64,
    /// Billed cycle usage as a percentage of the limit; 0 when no limit is set.
    pub cycle_percent: f64,
}

/// Today (live), yesterday, the current billing cycle and the previous calendar month for `scope`.
pub async fn traffic_overview(
    store: &MetricsStore,
    billing: &BillingConfig,
    scope: &Scope,
    now: DateTime<Utc>,
) -> anyhow::Result<TrafficOverview> {
    let tz = billing.tz()?;
    let mode = billing.billing_mode;
    let local = now.with_timezone(&tz);
    let today = local.date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);

    let (today_from, today_to) = day_bounds(today, &tz);
    let today_usage = store
        .traffic_delta(scope, today_from, today_to)
        .await?
        .unwrap_or_default();
    let yesterday_usage = store
        .daily_summary(yesterday, scope)
        .await?
        .map(|s| CounterPair::new(s.tx_bytes, s.rx_bytes))
        .unwrap_or_default();

    let cycle = billing_cycle(&local, billing.reset_day);
    let cycle_used = cycle_usage(store, scope, &cycle, &local).await?;

    let this_month = today.with_day(1).unwrap_or(today);
    let last_month_start = this_month
        .checked_sub_months(Months::new(1))
        .unwrap_or(this_month);
    let last_month = store.sum_daily(scope, last_month_start, this_month).await?;

    let limit_bytes = billing.monthly_limit_gb.saturating_mul(BYTES_PER_GB);
    let cycle_summary = Usage::new(cycle_used, mode);
    let cycle_percent = if limit_bytes == 0 {
        0.0
    } else {
        cycle_summary.billed as f64 / limit_bytes as f64 * 100.0
    };

    Ok(TrafficOverview {
        scope: *scope,
        today: Usage::new(today_usage, mode),
        yesterday: Usage::new(yesterday_usage, mode),
        cycle: cycle_summary,
        last_month: Usage::new(last_month, mode),
        cycle_start: cycle.start_date(),
        cycle_end: cycle.end_date(),
        days_remaining: cycle.days_remaining(&local),
        limit_bytes,
        cycle_percent,
    })
}

pub async fn daily_series(
    store: &MetricsStore,
    scope: &Scope,
    from: NaiveDate,
    to: NaiveDate,
) -> anyhow::Result<Vec<DailySummary>> {
    store.daily_summaries(scope, from, to).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthlyUsage {
    pub year: i32,
    pub month: u32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Daily summaries in [from, to] summed per calendar month, oldest first.
pub async fn monthly_series(
    store: &MetricsStore,
    scope: &Scope,
    from: NaiveDate,
    to: NaiveDate,
) -> anyhow::Result<Vec<MonthlyUsage>> {
    let days = store.daily_summaries(scope, from, to).await?;
    let mut months: BTreeMap<(i32, u32), CounterPair> = BTreeMap::new();
    for day in days {
        let entry = months
            .entry((day.date.year(), day.date.month()))
            .or_default();
        *entry = entry.saturating_add(CounterPair::new(day.tx_bytes, day.rx_bytes));
    }
    Ok(months
        .into_iter()
        .map(|((year, month), pair)| MonthlyUsage {
            year,
            month,
            tx_bytes: pair.tx,
            rx_bytes: pair.rx,
        })
        .collect())
}

/// Smallest offered bucket width that keeps a span of `span_secs` at or under ~1440 points.
pub fn choose_latency_granularity(span_secs: i64) -> u32 {
    let span = span_secs.max(0);
    LATENCY_STEPS_MINUTES
        .into_iter()
        .find(|step| span / (i64::from(*step) * 60) <= TARGET_POINTS)
        .unwrap_or(1440)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyPoint {
    /// Bucket start (unix seconds).
    pub ts: i64,
    /// Mean RTT weighted by replies received; `None` when the bucket had no replies.
    pub rtt_ms: Option<f64>,
    pub sent: u32,
    pub lost: u32,
    pub loss_percent: f64,
}

/// Raw and hourly rows of `target` in [from_ts, to_ts], bucketed by `granularity_minutes`.
pub async fn latency_series(
    store: &MetricsStore,
    target: &str,
    from_ts: i64,
    to_ts: i64,
    granularity_minutes: u32,
) -> anyhow::Result<Vec<LatencyPoint>> {
    let step = i64::from(granularity_minutes.max(1)) * 60;
    let records = store.latency_records(target, from_ts, to_ts).await?;

    #[derive(Default)]
    struct Bucket {
        weighted_rtt: f64,
        weight: f64,
        sent: u32,
        lost: u32,
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for record in records {
        let bucket = buckets
            .entry(record.ts - record.ts.rem_euclid(step))
            .or_default();
        if let Some(rtt) = record.rtt_ms {
            let received = record.sent.saturating_sub(record.lost).max(1);
            bucket.weighted_rtt += rtt * f64::from(received);
            bucket.weight += f64::from(received);
        }
        bucket.sent = bucket.sent.saturating_add(record.sent);
        bucket.lost = bucket.lost.saturating_add(record.lost);
    }

    Ok(buckets
        .into_iter()
        .map(|(ts, b)| LatencyPoint {
            ts,
            rtt_ms: (b.weight > 0.0).then(|| b.weighted_rtt / b.weight),
            sent: b.sent,
            lost: b.lost,
            loss_percent: if b.sent == 0 {
                0.0
            } else {
                f64::from(b.lost) / f64::from(b.sent) * 100.0
            },
        })
        .collect())
}

pub async fn latest_system_sample(
    store: &MetricsStore,
) -> anyhow::Result<Option<SystemMetricSample>> {
    store.latest_system_sample().await
}

pub async fn system_series(
    store: &MetricsStore,
    from_ts: i64,
    to_ts: i64,
) -> anyhow::Result<Vec<SystemMetricSample>> {
    store.system_samples(from_ts, to_ts).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortRulesHealth {
    pub ok: bool,
    /// Expected `-A ...` rules not found in the listing.
    pub missing: Vec<String>,
}

/// Whether `iptables -S` output carries the accounting rules for every port.
pub fn port_rules_health(listing: &str, chain: &str, ports: &[u16]) -> PortRulesHealth {
    if ports.is_empty() {
        return PortRulesHealth {
            ok: true,
            missing: Vec::new(),
        };
    }
    let missing = iptables::missing_rules(listing, chain, ports);
    PortRulesHealth {
        ok: missing.is_empty(),
        missing,
    }
}
