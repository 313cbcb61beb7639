// Raw traffic counter sources. The sampler depends on `TrafficSource` only, so tests can feed it
// scripted counters; `HostTrafficSource` reads sysinfo interfaces and the iptables accounting chain.

pub mod iptables;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::host_repo::HostRepo;
use crate::models::CounterReading;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("{command} exited with {status}: {stderr}")]
    Status {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("counters unreadable: {0}")]
    Unreadable(String),
}

#[async_trait]
pub trait TrafficSource: Send + Sync {
    /// Cumulative host tx/rx, one component per counted interface.
    async fn read_host(&self) -> Result<CounterReading, SourceError>;

    /// Cumulative tx/rx of one port, one component per accounting rule. `None` when no rule
    /// mentions the port.
    async fn read_port(&self, port: u16) -> Result<Option<CounterReading>, SourceError>;

    /// All ports of one tick. Sources that can read them in one go should override this.
    async fn read_ports(
        &self,
        ports: &[u16],
    ) -> Result<HashMap<u16, Option<CounterReading>>, SourceError> {
        let mut out = HashMap::with_capacity(ports.len());
        for port in ports {
            out.insert(*port, self.read_port(*port).await?);
        }
        Ok(out)
    }
}

pub struct HostTrafficSource {
    host: Arc<HostRepo>,
    excluded_prefixes: Arc<[String]>,
    chain: String,
    command_timeout: Duration,
}

impl HostTrafficSource {
    pub fn new(
        host: Arc<HostRepo>,
        excluded_prefixes: Vec<String>,
        chain: String,
        command_timeout: Duration,
    ) -> Self {
        Self {
            host,
            excluded_prefixes: excluded_prefixes.into(),
            chain,
            command_timeout,
        }
    }

    async fn list_chain(&self) -> Result<String, SourceError> {
        iptables::run(
            &["-L", &self.chain, "-n", "-v", "-x"],
            self.command_timeout,
        )
        .await
    }
}

#[async_trait]
impl TrafficSource for HostTrafficSource {
    async fn read_host(&self) -> Result<CounterReading, SourceError> {
        self.host
            .get_interface_counters(self.excluded_prefixes.clone())
            .await
            .map_err(|e| SourceError::Unreadable(e.to_string()))
    }

    async fn read_port(&self, port: u16) -> Result<Option<CounterReading>, SourceError> {
        let listing = self.list_chain().await?;
        Ok(iptables::parse_chain_bytes(&listing, port))
    }

    async fn read_ports(
        &self,
        ports: &[u16],
    ) -> Result<HashMap<u16, Option<CounterReading>>, SourceError> {
        if ports.is_empty() {
            return Ok(HashMap::new());
        }
        let listing = self.list_chain().await?;
        Ok(ports
            .iter()
            .map(|port| (*port, iptables::parse_chain_bytes(&listing, *port)))
            .collect())
    }
}
