use sqlx::Row;
use tracing::instrument;

use super::MetricsStore;
use crate::models::AlertRecord;

impl MetricsStore {
    #[instrument(skip(self, record), fields(repo = "store", operation = "insert_alert", threshold = record.threshold))]
    pub async fn insert_alert(&self, record: &AlertRecord) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO alert_records (ts, threshold, message) VALUES ($1, $2, $3)")
            .bind(record.ts)
            .bind(record.threshold as i64)
            .bind(&record.message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// True if an alert for exactly this threshold was recorded with ts > since_ts.
    pub async fn alert_sent_since(&self, threshold: u32, since_ts: i64) -> anyhow::Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM alert_records WHERE threshold = $1 AND ts > $2",
        )
        .bind(threshold as i64)
        .bind(since_ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Alerts with ts > since_ts, newest first.
    pub async fn recent_alerts(&self, since_ts: i64) -> anyhow::Result<Vec<AlertRecord>> {
        let rows = sqlx::query(
            "SELECT ts, threshold, message FROM alert_records WHERE ts > $1 ORDER BY ts DESC, id DESC",
        )
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let threshold: i64 = row.try_get("threshold")?;
            out.push(AlertRecord {
                ts: row.try_get("ts")?,
                threshold: threshold.max(0) as u32,
                message: row.try_get("message")?,
            });
        }
        Ok(out)
    }
}
