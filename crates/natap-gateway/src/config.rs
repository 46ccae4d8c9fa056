//! Gateway configuration: TOML file + CLI overrides.
//!
//! The file carries the controller sections (`[access_point]`,
//! `[interfaces]`, `[[port_forwarding]]`) plus an optional `[gateway]`
//! section for the daemon itself.

use anyhow::{Context, Result};
use natap_core::NatApConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// `[gateway]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: String,
    #[serde(default = "default_iptables")]
    pub iptables: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            runtime_dir: default_runtime_dir(),
            iptables: default_iptables(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2
}
fn default_runtime_dir() -> String {
    "/run/natap".to_string()
}
fn default_iptables() -> String {
    "iptables".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct DaemonFile {
    #[serde(default)]
    gateway: GatewaySection,
}

/// Values from the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ap_ip: Option<String>,
    pub downlink: Option<String>,
    pub uplink: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub dry_run: bool,
}

/// Resolved configuration (paths expanded, CLI overrides applied, validated).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub nat: NatApConfig,
    pub poll_interval: Duration,
    pub runtime_dir: PathBuf,
    pub iptables: String,
    pub dry_run: bool,
}

impl GatewayConfig {
    /// Load config from the TOML file if it exists, then apply overrides.
    pub fn load(config_path: &Path, overrides: Overrides) -> Result<Self> {
        let expanded = expand_tilde(config_path);
        let content = if expanded.exists() {
            info!(path = %expanded.display(), "loading config file");
            std::fs::read_to_string(&expanded)
                .with_context(|| format!("failed to read {}", expanded.display()))?
        } else {
            info!(path = %expanded.display(), "config file not found, using defaults");
            String::new()
        };
        Self::from_toml(&content, overrides)
            .with_context(|| format!("invalid config {}", expanded.display()))
    }

    pub fn from_toml(content: &str, overrides: Overrides) -> Result<Self> {
        let mut nat = NatApConfig::from_toml(content)?;
        let daemon: DaemonFile = toml::from_str(content).context("invalid [gateway] section")?;

        if let Some(ip) = overrides.ap_ip {
            nat.access_point.ip_address = ip;
        }
        if let Some(downlink) = overrides.downlink {
            nat.interfaces.downlink = downlink;
        }
        if let Some(uplink) = overrides.uplink {
            nat.interfaces.uplink = uplink;
        }
        nat.validate()?;

        let poll_secs = overrides
            .poll_interval_secs
            .unwrap_or(daemon.gateway.poll_interval_secs);
        if poll_secs == 0 {
            anyhow::bail!("poll interval must be at least one second");
        }

        Ok(Self {
            nat,
            poll_interval: Duration::from_secs(poll_secs),
            runtime_dir: expand_tilde_str(&daemon.gateway.runtime_dir),
            iptables: daemon.gateway.iptables,
            dry_run: overrides.dry_run,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
