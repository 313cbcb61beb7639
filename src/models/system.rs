// Host resource sample

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricSample {
    pub ts: i64,
    pub cpu_percent: f64,
    pub mem_used: u64,
    pub mem_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}
