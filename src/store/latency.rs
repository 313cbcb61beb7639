// Latency records: raw rows from the prober and hourly rows from down-sampling (is_aggregated = 1).

use sqlx::Row;
use tracing::instrument;

use super::MetricsStore;
use crate::models::LatencyRecord;

impl MetricsStore {
    #[instrument(skip(self, record), fields(repo = "store", operation = "insert_latency_record", target = %record.target))]
    pub async fn insert_latency_record(&self, record: &LatencyRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO latency_records (ts, target, rtt_ms, sent, lost, is_aggregated) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.ts)
        .bind(&record.target)
        .bind(record.rtt_ms)
        .bind(record.sent as i64)
        .bind(record.lost as i64)
        .bind(record.is_aggregated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Raw and aggregated records for one target with from_ts <= ts <= to_ts. Order: ascending by ts.
    pub async fn latency_records(
        &self,
        target: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<LatencyRecord>> {
        let rows = sqlx::query(
            "SELECT ts, target, rtt_ms, sent, lost, is_aggregated FROM latency_records
             WHERE target = $1 AND ts >= $2 AND ts <= $3 ORDER BY ts ASC, id ASC",
        )
        .bind(target)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_latency_row).collect()
    }

    /// Raw (non-aggregated) records of every target in [from_ts, to_ts). Order: ascending by ts.
    pub async fn raw_latency_records(
        &self,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<LatencyRecord>> {
        let rows = sqlx::query(
            "SELECT ts, target, rtt_ms, sent, lost, is_aggregated FROM latency_records
             WHERE is_aggregated = 0 AND ts >= $1 AND ts < $2 ORDER BY ts ASC, id ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_latency_row).collect()
    }

    /// Minimum ts of raw latency rows with ts < cutoff_ts (for down-sampling bounds).
    pub async fn min_raw_latency_ts_before(&self, cutoff_ts: i64) -> anyhow::Result<Option<i64>> {
        let ts = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MIN(ts) FROM latency_records WHERE is_aggregated = 0 AND ts < $1",
        )
        .bind(cutoff_ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(ts)
    }

    /// Swap the raw rows of [from_ts, to_ts) for their aggregated rows in one transaction.
    #[instrument(skip(self, aggregated), fields(repo = "store", operation = "replace_raw_latency_bucket", rows = aggregated.len()))]
    pub async fn replace_raw_latency_bucket(
        &self,
        from_ts: i64,
        to_ts: i64,
        aggregated: &[LatencyRecord],
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        for record in aggregated {
            sqlx::query(
                "INSERT INTO latency_records (ts, target, rtt_ms, sent, lost, is_aggregated) VALUES ($1, $2, $3, $4, $5, 1)",
            )
            .bind(record.ts)
            .bind(&record.target)
            .bind(record.rtt_ms)
            .bind(record.sent as i64)
            .bind(record.lost as i64)
            .execute(&mut *tx)
            .await?;
        }
        let r = sqlx::query(
            "DELETE FROM latency_records WHERE is_aggregated = 0 AND ts >= $1 AND ts < $2",
        )
        .bind(from_ts)
        .bind(to_ts)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(r.rows_affected())
    }
}

fn parse_latency_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<LatencyRecord> {
    let sent: i64 = row.try_get("sent")?;
    let lost: i64 = row.try_get("lost")?;
    Ok(LatencyRecord {
        ts: row.try_get("ts")?,
        target: row.try_get("target")?,
        rtt_ms: row.try_get("rtt_ms")?,
        sent: sent.clamp(0, u32::MAX as i64) as u32,
        lost: lost.clamp(0, u32::MAX as i64) as u32,
        is_aggregated: row.try_get("is_aggregated")?,
    })
}
