//! Controller configuration, loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid config. The
//! access-point address is kept as text: an unparseable value is not a config
//! error but a runtime fallback performed by the downlink configurator.

use serde::Deserialize;
use std::net::Ipv4Addr;

use crate::error::ConfigError;
use crate::platform::ApSettings;
use crate::rules::ForwardingProtocol;

/// Address used when the configured access-point address does not parse.
pub const DEFAULT_AP_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NatApConfig {
    #[serde(default)]
    pub access_point: AccessPointConfig,

    #[serde(default)]
    pub interfaces: InterfacesConfig,

    #[serde(default)]
    pub port_forwarding: Vec<PortForwardingEntry>,
}

impl NatApConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ap = &self.access_point;
        if ap.ssid.is_empty() || ap.ssid.len() > 32 {
            return Err(ConfigError::ValidationError(
                "access_point.ssid must be 1 to 32 bytes".to_string(),
            ));
        }
        let pass_len = ap.password.chars().count();
        if !(8..=63).contains(&pass_len) {
            return Err(ConfigError::ValidationError(
                "access_point.password must be 8 to 63 characters".to_string(),
            ));
        }
        if !(1..=14).contains(&ap.channel) {
            return Err(ConfigError::ValidationError(
                "access_point.channel must be in 1..=14".to_string(),
            ));
        }
        if ap.max_connections == 0 || ap.max_connections > 10 {
            return Err(ConfigError::ValidationError(
                "access_point.max_connections must be in 1..=10".to_string(),
            ));
        }
        if self.interfaces.downlink.is_empty() || self.interfaces.uplink.is_empty() {
            return Err(ConfigError::ValidationError(
                "interfaces.downlink and interfaces.uplink must be set".to_string(),
            ));
        }
        for (i, entry) in self.port_forwarding.iter().enumerate() {
            if entry.external_port == 0 || entry.internal_port == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "port_forwarding[{i}]: ports must be non-zero"
                )));
            }
        }
        Ok(())
    }

    pub fn ap_settings(&self) -> ApSettings {
        let ap = &self.access_point;
        ApSettings {
            ssid: ap.ssid.clone(),
            password: ap.password.clone(),
            channel: ap.channel,
            hidden: ap.hide_ssid,
            max_connections: ap.max_connections,
            beacon_interval_ms: ap.beacon_interval_ms,
        }
    }
}

/// `[access_point]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessPointConfig {
    #[serde(default = "default_ssid")]
    pub ssid: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_ip_address")]
    pub ip_address: String,
    #[serde(default)]
    pub hide_ssid: bool,
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_max_connections")]
    pub max_connections: u8,
    #[serde(default = "default_beacon_interval_ms")]
    pub beacon_interval_ms: u16,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: default_ssid(),
            password: default_password(),
            ip_address: default_ip_address(),
            hide_ssid: false,
            channel: default_channel(),
            max_connections: default_max_connections(),
            beacon_interval_ms: default_beacon_interval_ms(),
        }
    }
}

fn default_ssid() -> String {
    "ESPHomeAP".to_string()
}
fn default_password() -> String {
    "ESPHomeAPPass".to_string()
}
fn default_ip_address() -> String {
    DEFAULT_AP_ADDR.to_string()
}
fn default_channel() -> u8 {
    1
}
fn default_max_connections() -> u8 {
    4
}
fn default_beacon_interval_ms() -> u16 {
    100
}

/// `[interfaces]` section: names the platform uses to find the two links.
#[derive(Debug, Clone, Deserialize)]
pub struct InterfacesConfig {
    #[serde(default = "default_downlink")]
    pub downlink: String,
    #[serde(default = "default_uplink")]
    pub uplink: String,
}

impl Default for InterfacesConfig {
    fn default() -> Self {
        Self {
            downlink: default_downlink(),
            uplink: default_uplink(),
        }
    }
}

fn default_downlink() -> String {
    "ap0".to_string()
}
fn default_uplink() -> String {
    "wlan0".to_string()
}

/// One `[[port_forwarding]]` entry. The internal address stays textual until
/// registration, where an invalid one is rejected on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct PortForwardingEntry {
    pub protocol: ForwardingProtocol,
    pub external_port: u16,
    pub internal_ip: String,
    pub internal_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = NatApConfig::from_toml("").unwrap();
        assert_eq!(config.access_point.ssid, "ESPHomeAP");
        assert_eq!(config.access_point.password, "ESPHomeAPPass");
        assert_eq!(config.access_point.ip_address, "192.168.4.1");
        assert!(!config.access_point.hide_ssid);
        assert_eq!(config.access_point.channel, 1);
        assert_eq!(config.access_point.max_connections, 4);
        assert_eq!(config.interfaces.downlink, "ap0");
        assert_eq!(config.interfaces.uplink, "wlan0");
        assert!(config.port_forwarding.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_document() {
        let text = r#"
[access_point]
ssid = "garage"
password = "hunter2hunter2"
ip_address = "10.42.0.1"
hide_ssid = true
channel = 6

[interfaces]
downlink = "uap0"
uplink = "wlp2s0"

[[port_forwarding]]
protocol = "tcp"
external_port = 8080
internal_ip = "10.42.0.50"
internal_port = 80

[[port_forwarding]]
protocol = "TCP_UDP"
external_port = 25565
internal_ip = "10.42.0.9"
internal_port = 25565
"#;
        let config = NatApConfig::from_toml(text).unwrap();
        assert_eq!(config.access_point.ssid, "garage");
        assert!(config.access_point.hide_ssid);
        assert_eq!(config.access_point.channel, 6);
        assert_eq!(config.access_point.beacon_interval_ms, 100);
        assert_eq!(config.interfaces.uplink, "wlp2s0");
        assert_eq!(config.port_forwarding.len(), 2);
        assert_eq!(config.port_forwarding[0].protocol, ForwardingProtocol::Tcp);
        assert_eq!(config.port_forwarding[1].protocol, ForwardingProtocol::TcpAndUdp);
        assert!(config.validate().is_ok());

        let settings = config.ap_settings();
        assert_eq!(settings.ssid, "garage");
        assert!(settings.hidden);
    }

    #[test]
    fn test_unknown_protocol_is_parse_error() {
        let text = r#"
[[port_forwarding]]
protocol = "sctp"
external_port = 1
internal_ip = "192.168.4.2"
internal_port = 1
"#;
        assert!(matches!(
            NatApConfig::from_toml(text),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_short_password_rejected() {
        let mut config = NatApConfig::default();
        config.access_point.password = "short".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_zero_port_rejected() {
        let text = r#"
[[port_forwarding]]
protocol = "udp"
external_port = 0
internal_ip = "192.168.4.2"
internal_port = 53
"#;
        let config = NatApConfig::from_toml(text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_ap_address_is_not_a_config_error() {
        let mut config = NatApConfig::default();
        config.access_point.ip_address = "not-an-ip".to_string();
        assert!(config.validate().is_ok());
    }
}
