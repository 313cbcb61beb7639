// Outbound alert delivery. The quota monitor only sees the trait; Telegram is the shipped backend.

mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use chrono::NaiveDate;

/// Quota threshold crossing, as handed to a notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaAlert {
    pub server_name: String,
    /// Billed usage in whole GiB (rounded).
    pub used_gb: u64,
    pub limit_gb: u64,
    pub percent: f64,
    /// Last day of the current cycle.
    pub cycle_reset_date: NaiveDate,
    pub days_remaining: i64,
    pub threshold: u32,
    /// Local time of the check, preformatted in the billing timezone.
    pub checked_at: String,
}

impl QuotaAlert {
    /// Plain-text body shared by every backend and stored with the alert record.
    pub fn message(&self) -> String {
        format!(
            "Traffic alert [{}]\n\nUsed: {} GB / {} GB ({:.1}%)\nRemaining: {} GB\nReset: {} (in {} days)\nThreshold: {}%\n\nChecked at: {}",
            self.server_name,
            self.used_gb,
            self.limit_gb,
            self.percent,
            self.limit_gb.saturating_sub(self.used_gb),
            self.cycle_reset_date.format("%Y-%m-%d"),
            self.days_remaining,
            self.threshold,
            self.checked_at,
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert. An error means nothing was delivered and the caller may retry later.
    async fn send_quota_alert(&self, alert: &QuotaAlert) -> anyhow::Result<()>;
}
