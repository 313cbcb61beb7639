// Quota monitor: compares billed cycle usage of the host total against the configured limit and
// notifies each crossed threshold at most once per cooldown window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{info, instrument, warn};

use crate::billing::{billing_cycle, cycle_usage};
use crate::config::BillingConfig;
use crate::models::{AlertRecord, Scope};
use crate::notifier::{Notifier, QuotaAlert};
use crate::store::MetricsStore;

pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

pub struct QuotaMonitor {
    store: Arc<MetricsStore>,
    notifier: Arc<dyn Notifier>,
    billing: BillingConfig,
    tz: Tz,
    server_name: String,
    send_timeout: Duration,
}

impl QuotaMonitor {
    pub fn new(
        store: Arc<MetricsStore>,
        notifier: Arc<dyn Notifier>,
        billing: BillingConfig,
        server_name: String,
        send_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let tz = billing.tz()?;
        Ok(Self {
            store,
            notifier,
            billing,
            tz,
            server_name,
            send_timeout,
        })
    }

    /// One evaluation at `now`. Returns the thresholds a notification was delivered for.
    #[instrument(skip(self), fields(operation = "quota_evaluate"))]
    pub async fn evaluate(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<u32>> {
        if self.billing.monthly_limit_gb == 0 {
            return Ok(Vec::new());
        }
        let local = now.with_timezone(&self.tz);
        let cycle = billing_cycle(&local, self.billing.reset_day);
        let usage = cycle_usage(&self.store, &Scope::Total, &cycle, &local).await?;
        let used = self.billing.billing_mode.used(usage);
        let limit = self.billing.monthly_limit_gb.saturating_mul(BYTES_PER_GB);
        let percent = used as f64 / limit as f64 * 100.0;

        let cooldown_start =
            now.timestamp() - i64::from(self.billing.alert_cooldown_hours) * 3600;
        let mut notified = Vec::new();

        for threshold in due_thresholds(percent, &self.billing.alert_thresholds) {
            if self.store.alert_sent_since(threshold, cooldown_start).await? {
                continue;
            }
            let alert = QuotaAlert {
                server_name: self.server_name.clone(),
                used_gb: (used as f64 / BYTES_PER_GB as f64).round() as u64,
                limit_gb: self.billing.monthly_limit_gb,
                percent,
                cycle_reset_date: cycle.end_date(),
                days_remaining: cycle.days_remaining(&local),
                threshold,
                checked_at: local.format("%Y-%m-%d %H:%M %Z").to_string(),
            };

            match tokio::time::timeout(self.send_timeout, self.notifier.send_quota_alert(&alert))
                .await
            {
                Ok(Ok(())) => {
                    let record = AlertRecord {
                        ts: now.timestamp(),
                        threshold,
                        message: alert.message(),
                    };
                    if let Err(e) = self.store.insert_alert(&record).await {
                        warn!(error = %e, operation = "insert_alert", threshold, "alert sent but not recorded");
                    }
                    info!(threshold, percent, "quota alert sent");
                    notified.push(threshold);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, operation = "send_quota_alert", threshold, "quota alert failed");
                }
                Err(_) => {
                    warn!(
                        operation = "send_quota_alert",
                        threshold,
                        timeout_secs = self.send_timeout.as_secs(),
                        "quota alert timed out"
                    );
                }
            }
        }
        Ok(notified)
    }
}

/// Positive thresholds at or below `percent`, ascending and deduplicated.
pub fn due_thresholds(percent: f64, thresholds: &[u32]) -> Vec<u32> {
    let mut due: Vec<u32> = thresholds
        .iter()
        .copied()
        .filter(|t| *t > 0 && f64::from(*t) <= percent)
        .collect();
    due.sort_unstable();
    due.dedup();
    due
}
