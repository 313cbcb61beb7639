// `ping` subprocess probe and its output parser (iputils and BSD formats).

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::LatencyProbe;
use crate::models::ProbeResult;

/// iputils refuses intervals below 200ms for unprivileged users.
const MIN_GAP: Duration = Duration::from_millis(200);
const EXTRA_DEADLINE: Duration = Duration::from_secs(2);

static TRANSMITTED_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received").ok()
});

static RTT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = ([\d.]+)/([\d.]+)/([\d.]+)/([\d.]+)",
    )
    .ok()
});

/// Parse the summary lines of `ping` output. Output without a transmitted/received line counts as
/// `expected` probes all lost.
pub fn parse_ping_output(output: &str, expected: u32) -> ProbeResult {
    let counts = TRANSMITTED_RE.as_ref().and_then(|re| {
        let caps = re.captures(output)?;
        let sent = caps.get(1)?.as_str().parse::<u32>().ok()?;
        let received = caps.get(2)?.as_str().parse::<u32>().ok()?;
        Some((sent, received))
    });
    let Some((sent, received)) = counts else {
        return ProbeResult::total_loss(expected);
    };

    let avg_rtt_ms = if received == 0 {
        None
    } else {
        RTT_RE.as_ref().and_then(|re| {
            re.captures(output)
                .and_then(|caps| caps.get(2))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        })
    };

    ProbeResult {
        avg_rtt_ms,
        sent,
        lost: sent.saturating_sub(received),
    }
}

/// `ping -W` takes seconds on Linux (iputils, busybox) and milliseconds on macOS and FreeBSD.
const WAIT_IN_MILLIS: bool = cfg!(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
));

/// Arguments for one `ping` run of `count` probes.
pub fn ping_args(addr: IpAddr, count: u32, timeout: Duration, gap: Duration) -> Vec<String> {
    let wait = if WAIT_IN_MILLIS {
        timeout.as_millis().max(1).to_string()
    } else {
        (timeout.as_secs_f64().ceil().max(1.0) as u64).to_string()
    };
    vec![
        "-c".to_string(),
        count.to_string(),
        "-W".to_string(),
        wait,
        "-i".to_string(),
        format!("{:.1}", gap.max(MIN_GAP).as_secs_f64()),
        addr.to_string(),
    ]
}

#[derive(Default)]
pub struct PingCommandProbe;

impl PingCommandProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LatencyProbe for PingCommandProbe {
    #[instrument(skip(self), fields(probe = "ping"))]
    async fn probe(
        &self,
        addr: IpAddr,
        count: u32,
        timeout: Duration,
        gap: Duration,
    ) -> ProbeResult {
        let deadline = (timeout + gap.max(MIN_GAP)) * count + EXTRA_DEADLINE;

        let child = Command::new("ping")
            .args(ping_args(addr, count, timeout, gap))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "ping spawn failed");
                return ProbeResult::total_loss(count);
            }
        };

        // ping exits non-zero on loss; the summary is still on stdout.
        match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => parse_ping_output(&String::from_utf8_lossy(&output.stdout), count),
            Ok(Err(e)) => {
                debug!(error = %e, "ping wait failed");
                ProbeResult::total_loss(count)
            }
            Err(_) => {
                debug!(deadline_ms = deadline.as_millis() as u64, "ping timed out");
                ProbeResult::total_loss(count)
            }
        }
    }

    fn name(&self) -> &'static str {
        "ping"
    }
}
