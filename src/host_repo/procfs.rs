// Linux /proc readers. Parsers are plain functions over file contents so they run anywhere.

use super::MemoryUsage;

/// Aggregate CPU tick counters from the first `cpu ` line of /proc/stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTicks {
    pub idle: u64,
    pub total: u64,
}

/// Parse `cpu  user nice system idle iowait irq softirq steal ...`.
pub fn parse_cpu_ticks(stat: &str) -> Option<CpuTicks> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>().unwrap_or(0))
        .collect();
    if values.len() < 4 {
        return None;
    }
    Some(CpuTicks {
        idle: values[3],
        total: values.iter().sum(),
    })
}

/// Busy share of the ticks elapsed between two reads, in percent. 0 when no ticks elapsed.
pub fn cpu_percent(prev: CpuTicks, cur: CpuTicks) -> f64 {
    let total = cur.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let idle = cur.idle.saturating_sub(prev.idle).min(total);
    (100.0 * (total - idle) as f64 / total as f64).clamp(0.0, 100.0)
}

/// used = MemTotal - MemFree - Buffers - Cached (kB in the file, bytes out).
pub fn parse_meminfo(meminfo: &str) -> Option<MemoryUsage> {
    let mut total = None;
    let mut free = 0u64;
    let mut buffers = 0u64;
    let mut cached = 0u64;
    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(kb) = value.parse::<u64>() else {
            continue;
        };
        let bytes = kb.saturating_mul(1024);
        match key {
            "MemTotal:" => total = Some(bytes),
            "MemFree:" => free = bytes,
            "Buffers:" => buffers = bytes,
            "Cached:" => cached = bytes,
            _ => {}
        }
    }
    let total = total?;
    Some(MemoryUsage {
        used: total
            .saturating_sub(free)
            .saturating_sub(buffers)
            .saturating_sub(cached),
        total,
    })
}

pub(super) fn read_cpu_ticks() -> Option<CpuTicks> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/stat").ok()?;
        return parse_cpu_ticks(&content);
    }
    #[cfg(not(target_os = "linux"))]
    None
}

pub(super) fn read_memory() -> Option<MemoryUsage> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        return parse_meminfo(&content);
    }
    #[cfg(not(target_os = "linux"))]
    None
}
