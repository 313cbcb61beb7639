// Billing cycle arithmetic and cycle usage. Everything here works on local calendar dates of the
// configured timezone; callers pass `DateTime<Tz>` so tests can use `Utc` or a fixed offset.

use chrono::{DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::models::{CounterPair, Scope};
use crate::store::MetricsStore;

/// Which direction(s) count toward the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    #[default]
    Bidirectional,
    TxOnly,
    RxOnly,
    MaxValue,
}

impl BillingMode {
    pub fn used(&self, usage: CounterPair) -> u64 {
        match self {
            BillingMode::Bidirectional => usage.tx.saturating_add(usage.rx),
            BillingMode::TxOnly => usage.tx,
            BillingMode::RxOnly => usage.rx,
            BillingMode::MaxValue => usage.tx.max(usage.rx),
        }
    }
}

/// [start, end] of a billing cycle; `end` is one second before the next cycle starts.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingCycle<Tz: TimeZone> {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl<Tz: TimeZone> BillingCycle<Tz> {
    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Local date of the last second of the cycle (shown as the reset date in alerts).
    pub fn end_date(&self) -> NaiveDate {
        self.end.date_naive()
    }

    /// Whole days until the cycle ends; 0 once fewer than 24h remain.
    pub fn days_remaining(&self, now: &DateTime<Tz>) -> i64 {
        let left = self.end.clone().signed_duration_since(now.clone());
        left.num_days().max(0)
    }
}

/// The cycle containing `now`: starts on `reset_day` of this month when today is on or past it,
/// otherwise on `reset_day` of the previous month.
pub fn billing_cycle<Tz: TimeZone>(now: &DateTime<Tz>, reset_day: u32) -> BillingCycle<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let day = reset_day.clamp(1, 28);
    let this_month = today.with_day(day).unwrap_or(today);
    let start_date = if today.day() >= day {
        this_month
    } else {
        this_month
            .checked_sub_months(Months::new(1))
            .unwrap_or(this_month)
    };
    let next_start = start_date
        .checked_add_months(Months::new(1))
        .unwrap_or(start_date);

    BillingCycle {
        start: local_midnight(start_date, &tz),
        end: local_midnight(next_start, &tz) - Duration::seconds(1),
    }
}

/// Start of `date` in `tz`. An ambiguous midnight resolves to the earlier instant; a midnight
/// skipped by a DST jump resolves to the first valid instant after it.
pub fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => (1..=24 * 60)
            .find_map(|m| {
                tz.from_local_datetime(&(midnight + Duration::minutes(m)))
                    .earliest()
            })
            .unwrap_or_else(|| tz.from_utc_datetime(&midnight)),
    }
}

/// Unix-second bounds of a local day: [midnight, next midnight - 1s].
pub fn day_bounds<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> (i64, i64) {
    let start = local_midnight(date, tz).timestamp();
    let next = date.succ_opt().unwrap_or(date);
    let end = local_midnight(next, tz).timestamp() - 1;
    (start, end.max(start))
}

/// Usage of a scope in `cycle` as of `now`: closed days from the daily summaries plus the live
/// delta of today from the raw snapshots.
pub async fn cycle_usage<Tz: TimeZone>(
    store: &MetricsStore,
    scope: &Scope,
    cycle: &BillingCycle<Tz>,
    now: &DateTime<Tz>,
) -> anyhow::Result<CounterPair> {
    let today = now.date_naive();
    let closed = store.sum_daily(scope, cycle.start_date(), today).await?;
    let (from, to) = day_bounds(today, &now.timezone());
    let live = store
        .traffic_delta(scope, from, to)
        .await?
        .unwrap_or_default();
    Ok(closed.saturating_add(live))
}
