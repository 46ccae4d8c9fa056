//! Static port-forwarding rules and the table that holds them.
//!
//! Rules are append-only: they are registered by explicit calls (or from the
//! config file at construction) and only ever read by [`apply_rules`].

mod apply;

pub use apply::{apply_rules, ApplyReport};

use crate::error::ValidationError;
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::RwLock;

/// Protocol selector for a forwarding rule.
///
/// `TcpAndUdp` is a convenience that expands to two independent engine
/// mappings when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ForwardingProtocol {
    Tcp,
    Udp,
    TcpAndUdp,
}

impl ForwardingProtocol {
    /// The engine-level mappings this protocol expands to, in issue order.
    pub fn mappings(self) -> &'static [MappingProtocol] {
        match self {
            ForwardingProtocol::Tcp => &[MappingProtocol::Tcp],
            ForwardingProtocol::Udp => &[MappingProtocol::Udp],
            ForwardingProtocol::TcpAndUdp => &[MappingProtocol::Tcp, MappingProtocol::Udp],
        }
    }
}

impl FromStr for ForwardingProtocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(ForwardingProtocol::Tcp),
            "UDP" => Ok(ForwardingProtocol::Udp),
            "TCP_UDP" | "TCP_AND_UDP" => Ok(ForwardingProtocol::TcpAndUdp),
            _ => Err(ValidationError::UnknownProtocol(s.to_string())),
        }
    }
}

impl TryFrom<String> for ForwardingProtocol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ForwardingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForwardingProtocol::Tcp => "TCP",
            ForwardingProtocol::Udp => "UDP",
            ForwardingProtocol::TcpAndUdp => "TCP_UDP",
        })
    }
}

/// A single protocol as understood by the translation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingProtocol {
    Tcp,
    Udp,
}

impl MappingProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingProtocol::Tcp => "tcp",
            MappingProtocol::Udp => "udp",
        }
    }
}

impl fmt::Display for MappingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MappingProtocol::Tcp => "TCP",
            MappingProtocol::Udp => "UDP",
        })
    }
}

/// A registered forwarding rule: uplink `external_port` to
/// `internal_address:internal_port` on the downlink network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortForwardingRule {
    pub protocol: ForwardingProtocol,
    pub external_port: u16,
    pub internal_address: Ipv4Addr,
    pub internal_port: u16,
}

impl PortForwardingRule {
    /// Build a rule from its textual internal address. Only the address is
    /// validated; duplicate external ports are allowed.
    pub fn parse(
        protocol: ForwardingProtocol,
        external_port: u16,
        internal_address: &str,
        internal_port: u16,
    ) -> Result<Self, ValidationError> {
        let internal_address = internal_address
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| ValidationError::InvalidInternalAddress(internal_address.to_string()))?;
        Ok(Self {
            protocol,
            external_port,
            internal_address,
            internal_port,
        })
    }
}

impl fmt::Display for PortForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ext:{} -> {}:{}",
            self.protocol, self.external_port, self.internal_address, self.internal_port
        )
    }
}

/// Ordered, append-only rule storage shared between registration callers and
/// the applier.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: RwLock<Vec<PortForwardingRule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Returns the table length after the push.
    pub fn push(&self, rule: PortForwardingRule) -> usize {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        rules.push(rule);
        rules.len()
    }

    /// Copy of the rules in registration order.
    pub fn snapshot(&self) -> Vec<PortForwardingRule> {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse_is_case_insensitive() {
        assert_eq!("tcp".parse::<ForwardingProtocol>().unwrap(), ForwardingProtocol::Tcp);
        assert_eq!("Udp".parse::<ForwardingProtocol>().unwrap(), ForwardingProtocol::Udp);
        assert_eq!(
            "tcp_udp".parse::<ForwardingProtocol>().unwrap(),
            ForwardingProtocol::TcpAndUdp
        );
        assert_eq!(
            "TCP_AND_UDP".parse::<ForwardingProtocol>().unwrap(),
            ForwardingProtocol::TcpAndUdp
        );
        assert!("icmp".parse::<ForwardingProtocol>().is_err());
    }

    #[test]
    fn test_protocol_expansion() {
        assert_eq!(ForwardingProtocol::Tcp.mappings(), &[MappingProtocol::Tcp]);
        assert_eq!(ForwardingProtocol::Udp.mappings(), &[MappingProtocol::Udp]);
        assert_eq!(
            ForwardingProtocol::TcpAndUdp.mappings(),
            &[MappingProtocol::Tcp, MappingProtocol::Udp]
        );
    }

    #[test]
    fn test_rule_parse_valid() {
        let rule =
            PortForwardingRule::parse(ForwardingProtocol::Tcp, 8080, "192.168.4.50", 80).unwrap();
        assert_eq!(rule.internal_address, Ipv4Addr::new(192, 168, 4, 50));
        assert_eq!(rule.to_string(), "TCP ext:8080 -> 192.168.4.50:80");
    }

    #[test]
    fn test_rule_parse_rejects_bad_address() {
        for bad in ["", "192.168.4", "192.168.4.256", "fe80::1", "host.local"] {
            let err = PortForwardingRule::parse(ForwardingProtocol::Udp, 53, bad, 53).unwrap_err();
            assert_eq!(err, ValidationError::InvalidInternalAddress(bad.to_string()));
        }
    }

    #[test]
    fn test_table_keeps_registration_order_and_duplicates() {
        let table = RuleTable::new();
        assert!(table.is_empty());
        let a = PortForwardingRule::parse(ForwardingProtocol::Tcp, 80, "192.168.4.2", 80).unwrap();
        let b = PortForwardingRule::parse(ForwardingProtocol::Udp, 80, "192.168.4.3", 80).unwrap();
        assert_eq!(table.push(a), 1);
        assert_eq!(table.push(b), 2);
        assert_eq!(table.snapshot(), vec![a, b]);
    }
}
