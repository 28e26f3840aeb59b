// src/config.rs
use serde::Deserialize;
use std::{fs, net::Ipv4Addr, path::Path};

/// Exchange process configuration. Every field has a default reproducing
/// the stock deployment, so the binary runs with no config file at all.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExchangeConfig {
    pub general: General,
    pub order_gateway: OrderGateway,
    pub market_data: MarketData,
    pub cpu: ExchangeCpu,
    pub metrics: Option<Metrics>,
}

/// Participant process configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TraderConfig {
    pub general: General,
    pub order_gateway: OrderGatewayClient,
    pub market_data: MarketData,
    pub cpu: TraderCpu,
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct General {
    /// Structured JSON lines on stdout instead of env_logger's default.
    pub json_logs: bool,
    /// Spin iterations on an idle loop pass before the next poll.
    pub spin_loops_per_yield: u32,
}

impl Default for General {
    fn default() -> Self {
        Self {
            json_logs: false,
            spin_loops_per_yield: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderGateway {
    pub bind: String,
}

impl Default for OrderGateway {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:12345".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderGatewayClient {
    pub connect: String,
}

impl Default for OrderGatewayClient {
    fn default() -> Self {
        Self {
            connect: "127.0.0.1:12345".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketData {
    /// Local interface to join/publish multicast on.
    pub iface_addr: Ipv4Addr,
    pub incremental_group: Ipv4Addr,
    pub incremental_port: u16,
    pub snapshot_group: Ipv4Addr,
    pub snapshot_port: u16,
    /// Full-snapshot cadence on the snapshot group.
    pub snapshot_interval_secs: u64,
    pub recv_buffer_bytes: u32,
}

impl Default for MarketData {
    fn default() -> Self {
        Self {
            iface_addr: Ipv4Addr::UNSPECIFIED,
            incremental_group: Ipv4Addr::new(233, 252, 14, 3),
            incremental_port: 20001,
            snapshot_group: Ipv4Addr::new(233, 252, 14, 1),
            snapshot_port: 20000,
            snapshot_interval_secs: 60,
            recv_buffer_bytes: 8 << 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExchangeCpu {
    pub gateway_core: Option<usize>,
    pub engine_core: Option<usize>,
    pub publisher_core: Option<usize>,
    pub synthesizer_core: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TraderCpu {
    pub consumer_core: Option<usize>,
    pub gateway_core: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metrics {
    /// Bind address for the Prometheus exporter (e.g. "0.0.0.0:9100").
    pub bind: String,
}

impl ExchangeConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: ExchangeConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_market_data(&self.market_data)
    }
}

impl TraderConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: TraderConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_market_data(&self.market_data)
    }
}

fn validate_market_data(md: &MarketData) -> anyhow::Result<()> {
    if !md.incremental_group.is_multicast() || !md.snapshot_group.is_multicast() {
        anyhow::bail!("market_data groups must be multicast IPv4 addresses");
    }
    if md.incremental_group == md.snapshot_group && md.incremental_port == md.snapshot_port {
        anyhow::bail!("incremental and snapshot streams must not share an endpoint");
    }
    if md.snapshot_interval_secs == 0 {
        anyhow::bail!("market_data.snapshot_interval_secs must be > 0");
    }
    Ok(())
}
