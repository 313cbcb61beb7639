// Latency targets, probe results and stored records

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// A latency target: display tag plus address (IP or hostname).
/// Parsed from `"TAG:ADDR"` or a bare `"ADDR"` (the tag is then the address). A bare IPv6
/// literal is taken whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PingTarget {
    pub tag: String,
    pub addr: String,
}

impl PingTarget {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        anyhow::ensure!(!s.is_empty(), "empty ping target");
        if s.parse::<IpAddr>().is_ok() {
            return Ok(PingTarget {
                tag: s.to_string(),
                addr: s.to_string(),
            });
        }
        let target = match s.find(':') {
            Some(idx) if idx > 0 => PingTarget {
                tag: s[..idx].trim().to_string(),
                addr: s[idx + 1..].trim().to_string(),
            },
            _ => PingTarget {
                tag: s.to_string(),
                addr: s.to_string(),
            },
        };
        anyhow::ensure!(
            !target.addr.is_empty(),
            "ping target {:?} has an empty address",
            s
        );
        Ok(target)
    }
}

impl TryFrom<String> for PingTarget {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PingTarget::parse(&value)
    }
}

impl From<PingTarget> for String {
    fn from(t: PingTarget) -> Self {
        t.to_string()
    }
}

impl fmt::Display for PingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag == self.addr {
            f.write_str(&self.addr)
        } else {
            write!(f, "{}:{}", self.tag, self.addr)
        }
    }
}

/// Outcome of one probe round against a target.
/// `avg_rtt_ms` is the mean over successful probes only; `None` when every probe was lost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub avg_rtt_ms: Option<f64>,
    pub sent: u32,
    pub lost: u32,
}

impl ProbeResult {
    /// Every probe counted as lost.
    pub fn total_loss(count: u32) -> Self {
        Self {
            avg_rtt_ms: None,
            sent: count,
            lost: count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub ts: i64,
    pub target: String,
    pub rtt_ms: Option<f64>,
    pub sent: u32,
    pub lost: u32,
    pub is_aggregated: bool,
}
