// iptables accounting chain: listing parser, rule presence check, and the command runner.
//
// Expected rules (per port, both protocols):
//   -A INPUT -j <CHAIN>
//   -A OUTPUT -j <CHAIN>
//   -A <CHAIN> -p tcp --dport <port>   (rx)
//   -A <CHAIN> -p tcp --sport <port>   (tx)
//   (same pair for -p udp)

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::SourceError;
use crate::models::{CounterPair, CounterReading};

/// Byte counters of every rule line in `iptables -L <chain> -n -v -x` output that carries the
/// exact token `spt:<port>` (tx) or `dpt:<port>` (rx), one component per rule. `None` when
/// neither appears.
pub fn parse_chain_bytes(listing: &str, port: u16) -> Option<CounterReading> {
    let spt = format!("spt:{}", port);
    let dpt = format!("dpt:{}", port);
    let mut reading = CounterReading::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for line in listing.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(bytes) = fields.get(1).and_then(|b| b.parse::<u64>().ok()) else {
            continue;
        };
        let is_tx = fields.contains(&spt.as_str());
        let is_rx = fields.contains(&dpt.as_str());
        if !is_tx && !is_rx {
            continue;
        }
        let counters = CounterPair::new(
            if is_tx { bytes } else { 0 },
            if is_rx { bytes } else { 0 },
        );
        // Identical rules are told apart by their position among equals.
        let rule = fields[2..].join(" ");
        let nth = seen.entry(rule.clone()).or_insert(0);
        *nth += 1;
        reading.add(format!("{}#{}", rule, nth), counters);
    }
    (!reading.is_empty()).then_some(reading)
}

/// Rules from the expected set that are absent in `iptables -S` output, as `-A ...` lines.
pub fn missing_rules(listing: &str, chain: &str, ports: &[u16]) -> Vec<String> {
    let present: Vec<Vec<&str>> = listing
        .lines()
        .map(|l| l.split_whitespace().collect())
        .collect();

    let mut missing = Vec::new();
    for hook in ["INPUT", "OUTPUT"] {
        let wanted = ["-A", hook, "-j", chain];
        if !present.iter().any(|rule| rule.as_slice() == wanted) {
            missing.push(wanted.join(" "));
        }
    }

    for port in ports {
        let port_str = port.to_string();
        for proto in ["tcp", "udp"] {
            for flag in ["--dport", "--sport"] {
                let has_rule = present.iter().any(|rule| {
                    rule.len() >= 2
                        && rule[0] == "-A"
                        && rule[1] == chain
                        && has_pair(rule, "-p", proto)
                        && has_pair(rule, flag, &port_str)
                });
                if !has_rule {
                    missing.push(format!("-A {} -p {} {} {}", chain, proto, flag, port));
                }
            }
        }
    }
    missing
}

fn has_pair(rule: &[&str], key: &str, value: &str) -> bool {
    rule.windows(2).any(|w| w[0] == key && w[1] == value)
}

/// Run `iptables <args>` with a deadline; the child is killed if the deadline passes.
pub async fn run(args: &[&str], timeout: Duration) -> Result<String, SourceError> {
    let command = format!("iptables {}", args.join(" "));
    let child = Command::new("iptables")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SourceError::Spawn {
            command: command.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(SourceError::Spawn { command, source }),
        Err(_) => {
            return Err(SourceError::Timeout {
                command,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
    };

    if !output.status.success() {
        return Err(SourceError::Status {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `iptables -S` rule listing, for `missing_rules`.
pub async fn list_rules(timeout: Duration) -> Result<String, SourceError> {
    run(&["-S"], timeout).await
}
