// Traffic models: accounting scopes, counter pairs, raw snapshots and daily summaries

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Accounting bucket for traffic: the whole host or one monitored port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Total,
    Port(u16),
}

impl Scope {
    /// Text key used in the store (`total` or `port:<n>`).
    pub fn key(&self) -> String {
        match self {
            Scope::Total => "total".to_string(),
            Scope::Port(port) => format!("port:{}", port),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for Scope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "total" {
            return Ok(Scope::Total);
        }
        let port = s
            .strip_prefix("port:")
            .ok_or_else(|| anyhow::anyhow!("unknown scope key {:?}", s))?;
        Ok(Scope::Port(port.parse()?))
    }
}

impl Serialize for Scope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Transmit/receive byte counts. Used for raw counters, reconciled totals and deltas alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterPair {
    pub tx: u64,
    pub rx: u64,
}

impl CounterPair {
    pub fn new(tx: u64, rx: u64) -> Self {
        Self { tx, rx }
    }

    pub fn saturating_add(self, other: CounterPair) -> CounterPair {
        CounterPair {
            tx: self.tx.saturating_add(other.tx),
            rx: self.rx.saturating_add(other.rx),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.tx == 0 && self.rx == 0
    }
}

/// Raw counters of one scope, split by the independent counters they are read from (one per
/// interface or per firewall rule). Components reset independently, so they are reconciled one by
/// one before being summed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterReading {
    components: BTreeMap<String, CounterPair>,
}

impl CounterReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `counters` to component `key`. Repeated keys accumulate.
    pub fn add(&mut self, key: impl Into<String>, counters: CounterPair) {
        let entry = self.components.entry(key.into()).or_default();
        *entry = entry.saturating_add(counters);
    }

    pub fn with(mut self, key: impl Into<String>, counters: CounterPair) -> Self {
        self.add(key, counters);
        self
    }

    pub fn components(&self) -> impl Iterator<Item = (&str, CounterPair)> {
        self.components.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Sum over all components.
    pub fn total(&self) -> CounterPair {
        self.components
            .values()
            .fold(CounterPair::default(), |acc, c| acc.saturating_add(*c))
    }
}

/// A single unnamed counter.
impl From<CounterPair> for CounterReading {
    fn from(counters: CounterPair) -> Self {
        CounterReading::new().with("", counters)
    }
}

/// One reconciled cumulative reading for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub ts: i64,
    pub scope: Scope,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

impl TrafficSnapshot {
    pub fn counters(&self) -> CounterPair {
        CounterPair::new(self.tx_bytes, self.rx_bytes)
    }
}

/// Traffic of one local calendar day for a scope (max - min of that day's snapshots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub scope: Scope,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}
