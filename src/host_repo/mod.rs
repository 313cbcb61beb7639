// Host resource and interface counters via sysinfo, with /proc readers where the definition
// of a figure has to match the kernel's own accounting (CPU ticks, meminfo).

pub mod procfs;

use crate::models::{CounterPair, CounterReading};
use procfs::CpuTicks;
use std::path::Path;
use std::sync::Arc;
use sysinfo::{Disks, Networks, System};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Previous CPU reading. The first reading only seeds the baseline.
#[derive(Debug, Clone, Copy)]
enum CpuBaseline {
    Unseeded,
    Ticks(CpuTicks),
    Sysinfo,
}

pub struct HostRepo {
    sys: Arc<std::sync::Mutex<System>>,
    disks: Arc<std::sync::Mutex<Disks>>,
    networks: Arc<std::sync::Mutex<Networks>>,
    last_cpu: Arc<std::sync::Mutex<CpuBaseline>>,
}

impl Default for HostRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRepo {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let disks = Disks::new_with_refreshed_list();
        let networks = Networks::new_with_refreshed_list();
        Self {
            sys: Arc::new(std::sync::Mutex::new(sys)),
            disks: Arc::new(std::sync::Mutex::new(disks)),
            networks: Arc::new(std::sync::Mutex::new(networks)),
            last_cpu: Arc::new(std::sync::Mutex::new(CpuBaseline::Unseeded)),
        }
    }

    /// CPU utilisation since the previous call. The first call returns 0 and seeds the baseline.
    #[instrument(skip(self), fields(repo = "host", operation = "get_cpu_percent"))]
    pub async fn get_cpu_percent(&self) -> anyhow::Result<f64> {
        let sys = self.sys.clone();
        let last_cpu = self.last_cpu.clone();
        tokio::task::spawn_blocking(move || {
            let mut last = last_cpu
                .lock()
                .map_err(|e| anyhow::anyhow!("cpu baseline lock poisoned: {}", e))?;

            if let Some(cur) = procfs::read_cpu_ticks() {
                let usage = match *last {
                    CpuBaseline::Ticks(prev) => procfs::cpu_percent(prev, cur),
                    _ => 0.0,
                };
                *last = CpuBaseline::Ticks(cur);
                return Ok(usage);
            }

            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_cpu_usage();
            let usage = match *last {
                CpuBaseline::Sysinfo => (sys.global_cpu_usage() as f64).clamp(0.0, 100.0),
                _ => 0.0,
            };
            *last = CpuBaseline::Sysinfo;
            Ok(usage)
        })
        .await
        .map_err(|e| anyhow::anyhow!("host task join: {}", e))?
    }

    #[instrument(skip(self), fields(repo = "host", operation = "get_memory"))]
    pub async fn get_memory(&self) -> anyhow::Result<MemoryUsage> {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(mem) = procfs::read_memory() {
                return Ok(mem);
            }
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_memory();
            let total = sys.total_memory();
            Ok(MemoryUsage {
                used: total.saturating_sub(sys.available_memory()),
                total,
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("host task join: {}", e))?
    }

    /// Usage of the filesystem mounted at `/`; zeros when no such mount is listed.
    #[instrument(skip(self), fields(repo = "host", operation = "get_root_disk"))]
    pub async fn get_root_disk(&self) -> anyhow::Result<DiskUsage> {
        let disks = self.disks.clone();
        tokio::task::spawn_blocking(move || {
            let mut disks_guard = disks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo disks lock poisoned: {}", e))?;
            disks_guard.refresh(false);
            let usage = disks_guard
                .list()
                .iter()
                .find(|d| d.mount_point() == Path::new("/"))
                .map(|d| DiskUsage {
                    used: d.total_space().saturating_sub(d.available_space()),
                    total: d.total_space(),
                })
                .unwrap_or(DiskUsage { used: 0, total: 0 });
            Ok(usage)
        })
        .await
        .map_err(|e| anyhow::anyhow!("host task join: {}", e))?
    }

    pub fn get_load_average(&self) -> LoadAverage {
        let load = System::load_average();
        LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        }
    }

    /// Cumulative tx/rx bytes per interface, leaving out names matching any excluded prefix.
    #[instrument(skip(self, excluded_prefixes), fields(repo = "host", operation = "get_interface_counters"))]
    pub async fn get_interface_counters(
        &self,
        excluded_prefixes: Arc<[String]>,
    ) -> anyhow::Result<CounterReading> {
        let networks = self.networks.clone();
        tokio::task::spawn_blocking(move || {
            let mut networks_guard = networks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo networks lock poisoned: {}", e))?;
            networks_guard.refresh(true);
            let mut reading = CounterReading::new();
            for (name, data) in networks_guard.list() {
                if is_excluded_interface(name, &excluded_prefixes) {
                    continue;
                }
                reading.add(
                    name.as_str(),
                    CounterPair::new(data.total_transmitted(), data.total_received()),
                );
            }
            Ok(reading)
        })
        .await
        .map_err(|e| anyhow::anyhow!("host task join: {}", e))?
    }
}

/// Loopback, container bridges and veth pairs would double-count traffic already seen on the uplink.
pub fn is_excluded_interface(name: &str, excluded_prefixes: &[String]) -> bool {
    excluded_prefixes
        .iter()
        .any(|prefix| name.starts_with(prefix.as_str()))
}
