use serde::Deserialize;

use crate::billing::BillingMode;
use crate::models::{PingTarget, Scope};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub system: SystemConfig,
    pub latency: LatencyConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    pub billing: BillingConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_max_pool_size() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrafficConfig {
    #[serde(default = "default_traffic_interval_secs")]
    pub sample_interval_secs: u64,
    /// Monitored service ports (per-port accounting through the firewall chain).
    #[serde(default)]
    pub ports: Vec<u16>,
    /// iptables chain holding the per-port accounting rules.
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Interfaces whose name starts with any of these are left out of the host total.
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_interface_prefixes: Vec<String>,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_traffic_interval_secs() -> u64 {
    1
}

fn default_chain() -> String {
    "RELAY_STATS".into()
}

fn default_excluded_prefixes() -> Vec<String> {
    ["lo", "docker", "br-", "veth"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_command_timeout_ms() -> u64 {
    3000
}

impl TrafficConfig {
    /// Total scope followed by one scope per configured port.
    pub fn scopes(&self) -> Vec<Scope> {
        std::iter::once(Scope::Total)
            .chain(self.ports.iter().map(|p| Scope::Port(*p)))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_system_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default = "default_system_retention_secs")]
    pub retention_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_system_interval_secs(),
            retention_secs: default_system_retention_secs(),
        }
    }
}

fn default_system_interval_secs() -> u64 {
    5
}

fn default_system_retention_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStrategy {
    /// ICMP datagram socket when the kernel allows it, `ping` otherwise.
    #[default]
    Auto,
    Icmp,
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    #[serde(default = "default_latency_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub targets: Vec<PingTarget>,
    #[serde(default = "default_ping_count")]
    pub count: u32,
    #[serde(default = "default_ping_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_ping_gap_ms")]
    pub gap_ms: u64,
    #[serde(default)]
    pub strategy: ProbeStrategy,
}

fn default_latency_interval_secs() -> u64 {
    60
}

fn default_ping_count() -> u32 {
    5
}

fn default_ping_timeout_ms() -> u64 {
    1000
}

fn default_ping_gap_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_aggregation_interval_secs")]
    pub interval_secs: u64,
    /// Raw latency rows older than this are rolled into hourly rows.
    #[serde(default = "default_latency_raw_retention_days")]
    pub latency_raw_retention_days: u32,
    /// Optional cron expression for VACUUM (e.g. "0 0 4 * * *"). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_aggregation_interval_secs(),
            latency_raw_retention_days: default_latency_raw_retention_days(),
            vacuum_schedule: None,
            vacuum_interval_secs: default_vacuum_interval_secs(),
        }
    }
}

fn default_aggregation_interval_secs() -> u64 {
    60
}

fn default_latency_raw_retention_days() -> u32 {
    7
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// IANA timezone name used for calendar days and billing cycles.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Day of month (1-28) the billing cycle resets.
    #[serde(default = "default_reset_day")]
    pub reset_day: u32,
    /// 0 disables quota evaluation.
    pub monthly_limit_gb: u64,
    #[serde(default)]
    pub billing_mode: BillingMode,
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<u32>,
    #[serde(default = "default_alert_cooldown_hours")]
    pub alert_cooldown_hours: u32,
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_reset_day() -> u32 {
    1
}

fn default_alert_thresholds() -> Vec<u32> {
    vec![80, 90, 95]
}

fn default_alert_cooldown_hours() -> u32 {
    24
}

impl BillingConfig {
    /// Parsed timezone. Validated at load, so this only fails on a hand-built config.
    pub fn tz(&self) -> anyhow::Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("billing.timezone {:?}: {}", self.timezone, e))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,
    /// Name shown in alert messages.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            server_name: default_server_name(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

fn default_server_name() -> String {
    "relay".into()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

impl NotifierConfig {
    pub fn telegram_enabled(&self) -> bool {
        !self.telegram_bot_token.is_empty() && !self.telegram_chat_id.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often each collector logs its counters at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.traffic.sample_interval_secs > 0,
            "traffic.sample_interval_secs must be > 0, got {}",
            self.traffic.sample_interval_secs
        );
        anyhow::ensure!(
            self.traffic.ports.iter().all(|p| *p > 0),
            "traffic.ports must be between 1 and 65535, got {:?}",
            self.traffic.ports
        );
        anyhow::ensure!(
            !self.traffic.chain.is_empty(),
            "traffic.chain must be non-empty"
        );
        anyhow::ensure!(
            self.traffic.command_timeout_ms > 0,
            "traffic.command_timeout_ms must be > 0, got {}",
            self.traffic.command_timeout_ms
        );
        anyhow::ensure!(
            self.system.sample_interval_secs > 0,
            "system.sample_interval_secs must be > 0, got {}",
            self.system.sample_interval_secs
        );
        anyhow::ensure!(
            self.system.retention_secs > 0,
            "system.retention_secs must be > 0, got {}",
            self.system.retention_secs
        );
        anyhow::ensure!(
            self.latency.interval_secs > 0,
            "latency.interval_secs must be > 0, got {}",
            self.latency.interval_secs
        );
        anyhow::ensure!(
            self.latency.count > 0,
            "latency.count must be > 0, got {}",
            self.latency.count
        );
        anyhow::ensure!(
            self.latency.timeout_ms > 0,
            "latency.timeout_ms must be > 0, got {}",
            self.latency.timeout_ms
        );
        anyhow::ensure!(
            self.aggregation.interval_secs > 0,
            "aggregation.interval_secs must be > 0, got {}",
            self.aggregation.interval_secs
        );
        anyhow::ensure!(
            self.aggregation.latency_raw_retention_days > 0,
            "aggregation.latency_raw_retention_days must be > 0, got {}",
            self.aggregation.latency_raw_retention_days
        );
        anyhow::ensure!(
            self.aggregation.vacuum_interval_secs > 0,
            "aggregation.vacuum_interval_secs must be > 0, got {}",
            self.aggregation.vacuum_interval_secs
        );
        anyhow::ensure!(
            (1..=28).contains(&self.billing.reset_day),
            "billing.reset_day must be between 1 and 28, got {}",
            self.billing.reset_day
        );
        self.billing.tz()?;
        anyhow::ensure!(
            self.billing.alert_cooldown_hours > 0,
            "billing.alert_cooldown_hours must be > 0, got {}",
            self.billing.alert_cooldown_hours
        );
        anyhow::ensure!(
            self.notifier.timeout_secs > 0,
            "notifier.timeout_secs must be > 0, got {}",
            self.notifier.timeout_secs
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}
