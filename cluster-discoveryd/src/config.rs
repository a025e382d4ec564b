use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{CLUSTER_DOMAIN, CLUSTER_SERVICE, CLUSTER_SERVICE_PORT};
use crate::error::DiscoveryError;

/// Upper bound for the sweep and browse periods
const MAX_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Interface to bind to; empty means all interfaces
    #[serde(default)]
    pub interface: String,
    /// Instance label; defaults to the system hostname
    #[serde(default)]
    pub instance: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub text: Vec<String>,
    /// Comma-separated list of statically known peer addresses
    #[serde(default)]
    pub static_peers: String,
    /// Advertise this host instead of the local one (requires `address`)
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_browse_interval")]
    pub browse_interval_secs: u64,
    #[serde(default = "default_seed_delay")]
    pub seed_delay_secs: u64,
    #[serde(default = "default_lookup_holdoff")]
    pub lookup_holdoff_ms: u64,
}

fn default_service() -> String {
    CLUSTER_SERVICE.to_string()
}

fn default_domain() -> String {
    CLUSTER_DOMAIN.to_string()
}

fn default_port() -> u16 {
    CLUSTER_SERVICE_PORT
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_browse_interval() -> u64 {
    30
}

fn default_seed_delay() -> u64 {
    2
}

fn default_lookup_holdoff() -> u64 {
    1000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            instance: String::new(),
            service: default_service(),
            domain: default_domain(),
            port: default_port(),
            text: Vec::new(),
            static_peers: String::new(),
            host: None,
            address: None,
        }
    }
}

impl DiscoveryConfig {
    /// Configured interface name, `None` when binding to all interfaces
    pub fn interface(&self) -> Option<&str> {
        let name = self.interface.trim();
        (!name.is_empty()).then_some(name)
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            browse_interval_secs: default_browse_interval(),
            seed_delay_secs: default_seed_delay(),
            lookup_holdoff_ms: default_lookup_holdoff(),
        }
    }
}

impl MembershipConfig {
    /// Reject periods the timers cannot run with
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, secs) in [
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("browse_interval_secs", self.browse_interval_secs),
        ] {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                return Err(DiscoveryError::InvalidInterval { name, secs, max: MAX_INTERVAL_SECS });
            }
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn browse_interval(&self) -> Duration {
        Duration::from_secs(self.browse_interval_secs)
    }

    pub fn seed_delay(&self) -> Duration {
        Duration::from_secs(self.seed_delay_secs)
    }

    pub fn lookup_holdoff(&self) -> Duration {
        Duration::from_millis(self.lookup_holdoff_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
