// Shared test helpers
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use relaymon::billing::BillingMode;
use relaymon::config::BillingConfig;
use relaymon::models::{CounterPair, CounterReading, ProbeResult, Scope, TrafficSnapshot};
use relaymon::notifier::{Notifier, QuotaAlert};
use relaymon::probe::LatencyProbe;
use relaymon::sources::{SourceError, TrafficSource};
use relaymon::store::MetricsStore;

pub const GB: u64 = 1024 * 1024 * 1024;

/// Fresh initialized store in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn temp_store() -> (tempfile::TempDir, Arc<MetricsStore>) {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("metrics.db");
    let store = MetricsStore::connect(db_path.to_str().unwrap(), 2)
        .await
        .unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

/// Second pool on the store's database file, for tests that need to tamper with the schema.
pub async fn side_pool(dir: &tempfile::TempDir) -> sqlx::SqlitePool {
    let db_path = dir.path().join("metrics.db");
    sqlx::SqlitePool::connect(&format!("sqlite:{}", db_path.to_str().unwrap()))
        .await
        .unwrap()
}

/// Make every INSERT into `table` fail until `allow_inserts` is called.
pub async fn reject_inserts(pool: &sqlx::SqlitePool, table: &str) {
    sqlx::query(&format!(
        "CREATE TRIGGER reject_{table} BEFORE INSERT ON {table} BEGIN SELECT RAISE(ABORT, 'rejected'); END"
    ))
    .execute(pool)
    .await
    .unwrap();
}

pub async fn allow_inserts(pool: &sqlx::SqlitePool, table: &str) {
    sqlx::query(&format!("DROP TRIGGER reject_{table}"))
        .execute(pool)
        .await
        .unwrap();
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
}

pub fn billing_config(limit_gb: u64) -> BillingConfig {
    BillingConfig {
        timezone: "UTC".into(),
        reset_day: 1,
        monthly_limit_gb: limit_gb,
        billing_mode: BillingMode::Bidirectional,
        alert_thresholds: vec![80, 90, 95],
        alert_cooldown_hours: 24,
    }
}

pub async fn insert_snapshot(store: &MetricsStore, scope: Scope, ts: i64, tx: u64, rx: u64) {
    store
        .insert_traffic_snapshot(&TrafficSnapshot {
            ts,
            scope,
            tx_bytes: tx,
            rx_bytes: rx,
        })
        .await
        .unwrap();
}

/// Notifier that records every alert and can be switched to fail or stall.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<QuotaAlert>>,
    pub fail: std::sync::atomic::AtomicBool,
    pub stall: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn sent_thresholds(&self) -> Vec<u32> {
        self.sent.lock().unwrap().iter().map(|a| a.threshold).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_quota_alert(&self, alert: &QuotaAlert) -> anyhow::Result<()> {
        use std::sync::atomic::Ordering;
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("notifier down");
        }
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Traffic source replaying scripted readings. An exhausted host script reads as unreadable;
/// a port without a script reads as rule absent.
#[derive(Default)]
pub struct ScriptedSource {
    host: Mutex<VecDeque<Option<CounterReading>>>,
    ports: Mutex<HashMap<u16, VecDeque<Option<CounterReading>>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` entries read as a failed host read.
    pub fn with_host(self, readings: Vec<Option<CounterPair>>) -> Self {
        *self.host.lock().unwrap() = readings.into_iter().map(|r| r.map(Into::into)).collect();
        self
    }

    /// `None` entries read as rule absent.
    pub fn with_port(self, port: u16, readings: Vec<Option<CounterPair>>) -> Self {
        self.with_port_rules(port, readings.into_iter().map(|r| r.map(Into::into)).collect())
    }

    /// Port readings split by accounting rule.
    pub fn with_port_rules(self, port: u16, readings: Vec<Option<CounterReading>>) -> Self {
        self.ports.lock().unwrap().insert(port, readings.into());
        self
    }
}

#[async_trait]
impl TrafficSource for ScriptedSource {
    async fn read_host(&self) -> Result<CounterReading, SourceError> {
        self.host
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or_else(|| SourceError::Unreadable("scripted failure".into()))
    }

    async fn read_port(&self, port: u16) -> Result<Option<CounterReading>, SourceError> {
        Ok(self
            .ports
            .lock()
            .unwrap()
            .get_mut(&port)
            .and_then(|q| q.pop_front())
            .flatten())
    }
}

/// Probe answering every target with a fixed result.
pub struct FixedProbe(pub ProbeResult);

#[async_trait]
impl LatencyProbe for FixedProbe {
    async fn probe(
        &self,
        _addr: IpAddr,
        _count: u32,
        _timeout: Duration,
        _gap: Duration,
    ) -> ProbeResult {
        self.0
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
