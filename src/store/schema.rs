// Table definitions. Idempotent (IF NOT EXISTS); no migration framework.

use sqlx::SqlitePool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS traffic_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        scope TEXT NOT NULL,
        tx_bytes INTEGER NOT NULL,
        rx_bytes INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_traffic_snapshots_scope_ts ON traffic_snapshots(scope, ts)",
    "CREATE INDEX IF NOT EXISTS idx_traffic_snapshots_ts ON traffic_snapshots(ts)",
    r#"
    CREATE TABLE IF NOT EXISTS traffic_daily (
        date TEXT NOT NULL,
        scope TEXT NOT NULL,
        tx_bytes INTEGER NOT NULL,
        rx_bytes INTEGER NOT NULL,
        PRIMARY KEY (date, scope)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS system_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        cpu_percent REAL NOT NULL,
        mem_used INTEGER NOT NULL,
        mem_total INTEGER NOT NULL,
        disk_used INTEGER NOT NULL,
        disk_total INTEGER NOT NULL,
        load_1 REAL NOT NULL,
        load_5 REAL NOT NULL,
        load_15 REAL NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_system_metrics_ts ON system_metrics(ts)",
    r#"
    CREATE TABLE IF NOT EXISTS latency_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        target TEXT NOT NULL,
        rtt_ms REAL,
        sent INTEGER NOT NULL,
        lost INTEGER NOT NULL,
        is_aggregated INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_latency_target_ts ON latency_records(target, ts)",
    "CREATE INDEX IF NOT EXISTS idx_latency_aggregated_ts ON latency_records(is_aggregated, ts)",
    r#"
    CREATE TABLE IF NOT EXISTS alert_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        threshold INTEGER NOT NULL,
        message TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alert_threshold_ts ON alert_records(threshold, ts)",
];

pub(super) async fn create_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
