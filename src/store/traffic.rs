// Traffic snapshots (raw, reconciled cumulative counters) and daily summaries.

use chrono::NaiveDate;
use sqlx::Row;
use tracing::instrument;

use super::{MetricsStore, format_date, parse_date, to_u64};
use crate::models::{CounterPair, DailySummary, Scope, TrafficSnapshot};

impl MetricsStore {
    #[instrument(skip(self, snapshot), fields(repo = "store", operation = "insert_traffic_snapshot", scope = %snapshot.scope))]
    pub async fn insert_traffic_snapshot(&self, snapshot: &TrafficSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO traffic_snapshots (ts, scope, tx_bytes, rx_bytes) VALUES ($1, $2, $3, $4)",
        )
        .bind(snapshot.ts)
        .bind(snapshot.scope.key())
        .bind(snapshot.tx_bytes as i64)
        .bind(snapshot.rx_bytes as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent snapshot for a scope (used to seed counter offsets after a restart).
    pub async fn latest_traffic_snapshot(
        &self,
        scope: &Scope,
    ) -> anyhow::Result<Option<TrafficSnapshot>> {
        let row = sqlx::query(
            "SELECT ts, tx_bytes, rx_bytes FROM traffic_snapshots
             WHERE scope = $1 ORDER BY ts DESC, id DESC LIMIT 1",
        )
        .bind(scope.key())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TrafficSnapshot {
            ts: row.try_get("ts")?,
            scope: *scope,
            tx_bytes: to_u64(row.try_get("tx_bytes")?),
            rx_bytes: to_u64(row.try_get("rx_bytes")?),
        }))
    }

    /// Snapshots for a scope with from_ts <= ts <= to_ts. Order: ascending by ts.
    pub async fn traffic_snapshots(
        &self,
        scope: &Scope,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<TrafficSnapshot>> {
        let rows = sqlx::query(
            "SELECT ts, tx_bytes, rx_bytes FROM traffic_snapshots
             WHERE scope = $1 AND ts >= $2 AND ts <= $3 ORDER BY ts ASC, id ASC",
        )
        .bind(scope.key())
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TrafficSnapshot {
                ts: row.try_get("ts")?,
                scope: *scope,
                tx_bytes: to_u64(row.try_get("tx_bytes")?),
                rx_bytes: to_u64(row.try_get("rx_bytes")?),
            });
        }
        Ok(out)
    }

    /// max - min of the cumulative counters over [from_ts, to_ts]. None when the range has no snapshots.
    #[instrument(skip(self), fields(repo = "store", operation = "traffic_delta"))]
    pub async fn traffic_delta(
        &self,
        scope: &Scope,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Option<CounterPair>> {
        let (tx, rx) = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(
            "SELECT MAX(tx_bytes) - MIN(tx_bytes), MAX(rx_bytes) - MIN(rx_bytes)
             FROM traffic_snapshots WHERE scope = $1 AND ts >= $2 AND ts <= $3",
        )
        .bind(scope.key())
        .bind(from_ts)
        .bind(to_ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(match (tx, rx) {
            (None, None) => None,
            (tx, rx) => Some(CounterPair::new(
                to_u64(tx.unwrap_or(0)),
                to_u64(rx.unwrap_or(0)),
            )),
        })
    }

    /// Delete snapshots of every scope with ts < before_ts.
    #[instrument(skip(self), fields(repo = "store", operation = "prune_traffic_snapshots"))]
    pub async fn prune_traffic_snapshots(&self, before_ts: i64) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM traffic_snapshots WHERE ts < $1")
            .bind(before_ts)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Insert or overwrite the summary row for (date, scope).
    #[instrument(skip(self, summary), fields(repo = "store", operation = "upsert_daily_summary", date = %summary.date, scope = %summary.scope))]
    pub async fn upsert_daily_summary(&self, summary: &DailySummary) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO traffic_daily (date, scope, tx_bytes, rx_bytes) VALUES ($1, $2, $3, $4)
             ON CONFLICT(date, scope) DO UPDATE SET tx_bytes = excluded.tx_bytes, rx_bytes = excluded.rx_bytes",
        )
        .bind(format_date(summary.date))
        .bind(summary.scope.key())
        .bind(summary.tx_bytes as i64)
        .bind(summary.rx_bytes as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn daily_summary(
        &self,
        date: NaiveDate,
        scope: &Scope,
    ) -> anyhow::Result<Option<DailySummary>> {
        let row = sqlx::query(
            "SELECT tx_bytes, rx_bytes FROM traffic_daily WHERE date = $1 AND scope = $2",
        )
        .bind(format_date(date))
        .bind(scope.key())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(DailySummary {
            date,
            scope: *scope,
            tx_bytes: to_u64(row.try_get("tx_bytes")?),
            rx_bytes: to_u64(row.try_get("rx_bytes")?),
        }))
    }

    /// Summaries for a scope with from <= date <= to. Order: ascending by date.
    pub async fn daily_summaries(
        &self,
        scope: &Scope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<DailySummary>> {
        let rows = sqlx::query(
            "SELECT date, tx_bytes, rx_bytes FROM traffic_daily
             WHERE scope = $1 AND date >= $2 AND date <= $3 ORDER BY date ASC",
        )
        .bind(scope.key())
        .bind(format_date(from))
        .bind(format_date(to))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let date: String = row.try_get("date")?;
            out.push(DailySummary {
                date: parse_date(&date)?,
                scope: *scope,
                tx_bytes: to_u64(row.try_get("tx_bytes")?),
                rx_bytes: to_u64(row.try_get("rx_bytes")?),
            });
        }
        Ok(out)
    }

    /// Sum of daily summaries for a scope with from <= date < until.
    pub async fn sum_daily(
        &self,
        scope: &Scope,
        from: NaiveDate,
        until: NaiveDate,
    ) -> anyhow::Result<CounterPair> {
        let (tx, rx) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COALESCE(SUM(tx_bytes), 0), COALESCE(SUM(rx_bytes), 0) FROM traffic_daily
             WHERE scope = $1 AND date >= $2 AND date < $3",
        )
        .bind(scope.key())
        .bind(format_date(from))
        .bind(format_date(until))
        .fetch_one(&self.pool)
        .await?;
        Ok(CounterPair::new(to_u64(tx), to_u64(rx)))
    }
}
