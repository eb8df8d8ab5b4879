//! Configuration types for netstate-dns.

use ipnetwork::Ipv6Network;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::{Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DnsError;

/// Standard DNS port. Binding it excludes loopback upstreams.
pub const DNS_PORT: u16 = 53;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// This instance's own subnet. Records flagged `localize` only return
    /// addresses inside it.
    #[serde(default)]
    pub instance_subnet: Option<Ipv6Network>,

    /// Upstream resolver for unmatched queries. Discovered from the host
    /// resolver configuration when unset.
    #[serde(default)]
    pub upstream: Option<SocketAddr>,

    /// Upper bound on one upstream exchange, in milliseconds.
    #[serde(default = "default_delegation_timeout_ms")]
    pub delegation_timeout_ms: u64,

    /// Idle timeout for inbound TCP connections, in seconds.
    #[serde(default = "default_tcp_timeout_secs")]
    pub tcp_timeout_secs: u64,

    /// JSON document loaded before serving.
    #[serde(default)]
    pub initial_doc: Option<PathBuf>,
}

impl DnsConfig {
    /// Upstream exchange timeout.
    pub fn delegation_timeout(&self) -> Duration {
        Duration::from_millis(self.delegation_timeout_ms)
    }

    /// Inbound TCP idle timeout.
    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            instance_subnet: None,
            upstream: None,
            delegation_timeout_ms: default_delegation_timeout_ms(),
            tcp_timeout_secs: default_tcp_timeout_secs(),
            initial_doc: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8053))
}

fn default_delegation_timeout_ms() -> u64 {
    2000
}

fn default_tcp_timeout_secs() -> u64 {
    30
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "netstate_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "netstate-dns".to_string()
}

/// Read a JSON document or diff from `path`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, DnsError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: DnsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen_addr, "[::]:8053".parse().unwrap());
        assert_eq!(config.delegation_timeout(), Duration::from_secs(2));
        assert_eq!(config.tcp_timeout(), Duration::from_secs(30));
        assert!(config.upstream.is_none());
        assert!(config.instance_subnet.is_none());
    }

    #[test]
    fn test_instance_subnet_parses() {
        let config: DnsConfig =
            serde_json::from_str(r#"{"instance_subnet": "fc75:0:9fb2::/48"}"#).unwrap();
        let subnet = config.instance_subnet.unwrap();
        assert_eq!(subnet.prefix(), 48);
        assert!(subnet.contains("fc75:0:9fb2::804".parse().unwrap()));
    }
}
