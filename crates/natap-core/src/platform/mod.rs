//! Narrow interfaces to the collaborators the controller drives but does not
//! implement: the network interface provider, the downlink's address-leasing
//! service, the address-translation engine, the radio, and the source of
//! network notifications.
//!
//! All calls are synchronous and complete or fail immediately. A concrete
//! platform implements every trait; [`Platform`] is the blanket bundle the
//! controller is generic over.

mod mock;

pub use mock::{MockCall, MockPlatform};

use crate::error::PlatformError;
use crate::events::{EventKind, EventHandler, SubscriptionId};
use crate::rules::MappingProtocol;
use std::fmt;
use std::net::Ipv4Addr;

/// Opaque handle for a network interface, acquired once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IfaceHandle {
    name: String,
}

impl IfaceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for IfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// IPv4 address state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Info {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Ipv4Info {
    /// `0.0.0.0` means the interface has no usable address yet.
    pub fn has_address(&self) -> bool {
        !self.ip.is_unspecified()
    }
}

/// Access-point parameters handed to the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApSettings {
    pub ssid: String,
    pub password: String,
    pub channel: u8,
    pub hidden: bool,
    pub max_connections: u8,
    pub beacon_interval_ms: u16,
}

/// Supplies handles and address/DNS state for the two interfaces.
pub trait InterfaceProvider {
    /// Provision the downlink (access-point) interface.
    fn create_downlink_interface(&self) -> Result<IfaceHandle, PlatformError>;

    /// Resolve the already-existing uplink (station) interface by name.
    fn uplink_interface(&self, name: &str) -> Result<IfaceHandle, PlatformError>;

    fn interface_address(&self, iface: &IfaceHandle) -> Option<Ipv4Info>;

    fn set_interface_address(&self, iface: &IfaceHandle, info: Ipv4Info)
        -> Result<(), PlatformError>;

    fn dns_server(&self, iface: &IfaceHandle) -> Option<Ipv4Addr>;

    fn set_dns_server(&self, iface: &IfaceHandle, dns: Ipv4Addr) -> Result<(), PlatformError>;
}

/// Control over the address-leasing (DHCP) service on the downlink.
pub trait LeaseControl {
    /// Stop leasing. Returns [`PlatformError::AlreadyStopped`] if it was not running.
    fn stop_leasing(&self, iface: &IfaceHandle) -> Result<(), PlatformError>;

    /// Offer `dns` to clients in lease responses.
    fn set_leased_dns_option(&self, iface: &IfaceHandle, dns: Ipv4Addr)
        -> Result<(), PlatformError>;
}

/// The black-box network/port address translation engine.
pub trait TranslationEngine {
    /// Activate translation for traffic from the network of `address`.
    fn enable_translation(&self, address: Ipv4Addr);

    fn add_port_mapping(
        &self,
        protocol: MappingProtocol,
        external_addr: Ipv4Addr,
        external_port: u16,
        internal_addr: Ipv4Addr,
        internal_port: u16,
    ) -> Result<(), PlatformError>;
}

/// The Wi-Fi radio: combined access-point + station mode.
pub trait RadioControl {
    fn configure_access_point(&self, settings: &ApSettings) -> Result<(), PlatformError>;

    fn start(&self) -> Result<(), PlatformError>;
}

/// Delivers network notifications to handlers bound at subscribe time.
pub trait EventSource {
    fn subscribe(
        &self,
        kind: EventKind,
        handler: EventHandler,
    ) -> Result<SubscriptionId, PlatformError>;
}

/// Everything the controller needs from the host platform.
pub trait Platform:
    InterfaceProvider + LeaseControl + TranslationEngine + RadioControl + EventSource + Send + Sync + 'static
{
}

impl<T> Platform for T where
    T: InterfaceProvider
        + LeaseControl
        + TranslationEngine
        + RadioControl
        + EventSource
        + Send
        + Sync
        + 'static
{
}
