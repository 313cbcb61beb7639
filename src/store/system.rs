use sqlx::Row;
use tracing::instrument;

use super::{MetricsStore, to_u64};
use crate::models::SystemMetricSample;

impl MetricsStore {
    #[instrument(skip(self, sample), fields(repo = "store", operation = "insert_system_sample"))]
    pub async fn insert_system_sample(&self, sample: &SystemMetricSample) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO system_metrics (ts, cpu_percent, mem_used, mem_total, disk_used, disk_total, load_1, load_5, load_15)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(sample.ts)
        .bind(sample.cpu_percent)
        .bind(sample.mem_used as i64)
        .bind(sample.mem_total as i64)
        .bind(sample.disk_used as i64)
        .bind(sample.disk_total as i64)
        .bind(sample.load1)
        .bind(sample.load5)
        .bind(sample.load15)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "store", operation = "prune_system_samples"))]
    pub async fn prune_system_samples(&self, before_ts: i64) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM system_metrics WHERE ts < $1")
            .bind(before_ts)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    pub async fn latest_system_sample(&self) -> anyhow::Result<Option<SystemMetricSample>> {
        let row = sqlx::query(
            "SELECT ts, cpu_percent, mem_used, mem_total, disk_used, disk_total, load_1, load_5, load_15
             FROM system_metrics ORDER BY ts DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_system_row).transpose()
    }

    /// Samples with from_ts <= ts <= to_ts. Order: ascending by ts.
    pub async fn system_samples(
        &self,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<SystemMetricSample>> {
        let rows = sqlx::query(
            "SELECT ts, cpu_percent, mem_used, mem_total, disk_used, disk_total, load_1, load_5, load_15
             FROM system_metrics WHERE ts >= $1 AND ts <= $2 ORDER BY ts ASC, id ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_system_row).collect()
    }
}

fn parse_system_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<SystemMetricSample> {
    Ok(SystemMetricSample {
        ts: row.try_get("ts")?,
        cpu_percent: row.try_get("cpu_percent")?,
        mem_used: to_u64(row.try_get("mem_used")?),
        mem_total: to_u64(row.try_get("mem_total")?),
        disk_used: to_u64(row.try_get("disk_used")?),
        disk_total: to_u64(row.try_get("disk_total")?),
        load1: row.try_get("load_1")?,
        load5: row.try_get("load_5")?,
        load15: row.try_get("load_15")?,
    })
}
