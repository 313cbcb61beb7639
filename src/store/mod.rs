// SQLite metrics store. One writer process; sqlx pool serializes access, WAL keeps readers unblocked.
// Table access is split by concern (traffic, system, latency, alerts); schema lives in `schema`.

mod alerts;
mod latency;
mod schema;
mod system;
mod traffic;

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct MetricsStore {
    pool: SqlitePool,
}

impl MetricsStore {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL + pragmas.
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables if they don't exist.
    pub async fn init(&self) -> anyhow::Result<()> {
        schema::create_tables(&self.pool).await
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "store", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool; waits for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| anyhow::anyhow!("bad stored date {:?}: {}", s, e))
}

/// Byte counters are stored as INTEGER (i64); negative values never come from the writer.
fn to_u64(v: i64) -> u64 {
    v.max(0) as u64
}
