// Latency probing. `LatencyProbe` is the capability the latency sampler needs; the ICMP
// datagram socket is preferred and the system `ping` binary is the fallback.

mod icmp;
mod ping;

pub use icmp::{IcmpProbe, build_echo_request, icmp_checksum, parse_echo_reply};
pub use ping::{PingCommandProbe, parse_ping_output, ping_args};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ProbeStrategy;
use crate::models::ProbeResult;

#[derive(Debug, Error)]
pub enum ProbeSetupError {
    #[error("ICMP datagram socket unavailable: {0}")]
    IcmpUnavailable(#[source] std::io::Error),
}

#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Send `count` echo requests `gap` apart, waiting up to `timeout` for each reply.
    async fn probe(&self, addr: IpAddr, count: u32, timeout: Duration, gap: Duration)
    -> ProbeResult;

    fn name(&self) -> &'static str;
}

/// Pick the probe for `strategy`. `Auto` falls back to `ping` when the kernel refuses
/// unprivileged ICMP sockets (see net.ipv4.ping_group_range).
pub fn select_probe(strategy: ProbeStrategy) -> Result<Arc<dyn LatencyProbe>, ProbeSetupError> {
    match strategy {
        ProbeStrategy::Icmp => Ok(Arc::new(IcmpProbe::new()?)),
        ProbeStrategy::Ping => Ok(Arc::new(PingCommandProbe::new())),
        ProbeStrategy::Auto => match IcmpProbe::new() {
            Ok(probe) => {
                info!(probe = probe.name(), "latency probe selected");
                Ok(Arc::new(probe))
            }
            Err(e) => {
                warn!(error = %e, "falling back to the ping command for latency probes");
                Ok(Arc::new(PingCommandProbe::new()))
            }
        },
    }
}

/// Resolve a target address (IP literal or hostname). IPv4 results are preferred.
pub async fn resolve(addr: &str) -> std::io::Result<IpAddr> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(ip);
    }
    let resolved: Vec<IpAddr> = tokio::net::lookup_host((addr, 0))
        .await?
        .map(|sa| sa.ip())
        .collect();
    resolved
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| resolved.first())
        .copied()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {}", addr),
            )
        })
}

/// Mean of the successful round trips, `None` when there were none.
pub(crate) fn summarize(rtts_ms: &[f64], sent: u32) -> ProbeResult {
    let received = rtts_ms.len() as u32;
    let avg_rtt_ms = if rtts_ms.is_empty() {
        None
    } else {
        Some(rtts_ms.iter().sum::<f64>() / rtts_ms.len() as f64)
    };
    ProbeResult {
        avg_rtt_ms,
        sent,
        lost: sent.saturating_sub(received),
    }
}
