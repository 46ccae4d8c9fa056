use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use super::*;
use crate::events::{EventDispatcher, NetEvent};

/// One recorded interaction with the [`MockPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateDownlink,
    ResolveUplink {
        name: String,
    },
    InterfaceAddress {
        iface: String,
    },
    SetInterfaceAddress {
        iface: String,
        info: Ipv4Info,
    },
    DnsServer {
        iface: String,
    },
    SetDnsServer {
        iface: String,
        dns: Ipv4Addr,
    },
    StopLeasing {
        iface: String,
    },
    SetLeasedDnsOption {
        iface: String,
        dns: Ipv4Addr,
    },
    EnableTranslation {
        address: Ipv4Addr,
    },
    AddPortMapping {
        protocol: MappingProtocol,
        external_addr: Ipv4Addr,
        external_port: u16,
        internal_addr: Ipv4Addr,
        internal_port: u16,
    },
    ConfigureAccessPoint(ApSettings),
    StartRadio,
    Subscribe(EventKind),
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    addresses: HashMap<String, Ipv4Info>,
    dns: HashMap<String, Ipv4Addr>,
    leasing_running: bool,
    fail_downlink: bool,
    missing_uplink: bool,
    fail_set_address: bool,
    fail_stop_leasing: bool,
    fail_dns_option: bool,
    fail_set_dns: bool,
    fail_radio: bool,
    fail_start: bool,
    rejected_ports: HashSet<u16>,
}

/// An in-memory platform for testing. Records every call in order, keeps
/// interface state in maps, and lets tests inject failures and fire events.
pub struct MockPlatform {
    state: Mutex<MockState>,
    dispatcher: EventDispatcher,
}

impl MockPlatform {
    pub const DOWNLINK: &'static str = "ap0";
    pub const UPLINK: &'static str = "wlan0";

    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            dispatcher: EventDispatcher::new(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: MockCall) {
        self.state().calls.push(call);
    }

    /// Give the uplink an address in a /24, or take it away.
    pub fn set_uplink_address(&self, ip: Option<Ipv4Addr>) {
        let mut state = self.state();
        match ip {
            Some(ip) => {
                let [a, b, c, _] = ip.octets();
                state.addresses.insert(
                    Self::UPLINK.to_string(),
                    Ipv4Info {
                        ip,
                        netmask: Ipv4Addr::new(255, 255, 255, 0),
                        gateway: Ipv4Addr::new(a, b, c, 1),
                    },
                );
            }
            None => {
                state.addresses.remove(Self::UPLINK);
            }
        }
    }

    pub fn set_uplink_dns(&self, dns: Option<Ipv4Addr>) {
        let mut state = self.state();
        match dns {
            Some(dns) => state.dns.insert(Self::UPLINK.to_string(), dns),
            None => state.dns.remove(Self::UPLINK),
        };
    }

    /// Remove any address from the downlink, as if it was never assigned.
    pub fn clear_downlink_address(&self) {
        self.state().addresses.remove(Self::DOWNLINK);
    }

    pub fn set_leasing_running(&self, running: bool) {
        self.state().leasing_running = running;
    }

    pub fn fail_downlink_creation(&self) {
        self.state().fail_downlink = true;
    }

    pub fn remove_uplink(&self) {
        self.state().missing_uplink = true;
    }

    pub fn fail_address_assignment(&self) {
        self.state().fail_set_address = true;
    }

    pub fn fail_stop_leasing(&self) {
        self.state().fail_stop_leasing = true;
    }

    pub fn fail_dns_option(&self) {
        self.state().fail_dns_option = true;
    }

    pub fn fail_set_dns(&self) {
        self.state().fail_set_dns = true;
    }

    pub fn fail_radio(&self) {
        self.state().fail_radio = true;
    }

    /// Let the radio accept its settings but refuse to start.
    pub fn fail_start(&self) {
        self.state().fail_start = true;
    }

    /// Make the engine reject every mapping on this external port.
    pub fn reject_external_port(&self, port: u16) {
        self.state().rejected_ports.insert(port);
    }

    /// Deliver an event to subscribers. Returns how many handlers ran.
    pub fn fire(&self, event: NetEvent) -> usize {
        self.dispatcher.dispatch(&event)
    }

    /// Assign the uplink address and fire the matching acquisition event.
    pub fn acquire_uplink(&self, ip: Ipv4Addr) -> usize {
        self.set_uplink_address(Some(ip));
        let info = self.state().addresses[Self::UPLINK];
        self.fire(NetEvent::UplinkAddressAcquired { info })
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Only the calls that change engine state.
    pub fn engine_calls(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    MockCall::EnableTranslation { .. } | MockCall::AddPortMapping { .. }
                )
            })
            .collect()
    }

    pub fn mappings(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::AddPortMapping { .. }))
            .collect()
    }

    pub fn translation_enables(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::EnableTranslation { .. }))
            .count()
    }

    pub fn address_of(&self, iface: &str) -> Option<Ipv4Info> {
        self.state().addresses.get(iface).copied()
    }

    pub fn dns_of(&self, iface: &str) -> Option<Ipv4Addr> {
        self.state().dns.get(iface).copied()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.dispatcher.subscriber_count(kind)
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceProvider for MockPlatform {
    fn create_downlink_interface(&self) -> Result<IfaceHandle, PlatformError> {
        self.record(MockCall::CreateDownlink);
        if self.state().fail_downlink {
            return Err(PlatformError::Interface("downlink creation failed".to_string()));
        }
        Ok(IfaceHandle::new(Self::DOWNLINK))
    }

    fn uplink_interface(&self, name: &str) -> Result<IfaceHandle, PlatformError> {
        self.record(MockCall::ResolveUplink {
            name: name.to_string(),
        });
        if self.state().missing_uplink {
            return Err(PlatformError::Interface(format!("no interface named {name}")));
        }
        Ok(IfaceHandle::new(name))
    }

    fn interface_address(&self, iface: &IfaceHandle) -> Option<Ipv4Info> {
        let mut state = self.state();
        state.calls.push(MockCall::InterfaceAddress {
            iface: iface.name().to_string(),
        });
        state.addresses.get(iface.name()).copied()
    }

    fn set_interface_address(&self, iface: &IfaceHandle, info: Ipv4Info) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::SetInterfaceAddress {
            iface: iface.name().to_string(),
            info,
        });
        if state.fail_set_address {
            return Err(PlatformError::Interface("address assignment refused".to_string()));
        }
        state.addresses.insert(iface.name().to_string(), info);
        Ok(())
    }

    fn dns_server(&self, iface: &IfaceHandle) -> Option<Ipv4Addr> {
        let mut state = self.state();
        state.calls.push(MockCall::DnsServer {
            iface: iface.name().to_string(),
        });
        state.dns.get(iface.name()).copied()
    }

    fn set_dns_server(&self, iface: &IfaceHandle, dns: Ipv4Addr) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::SetDnsServer {
            iface: iface.name().to_string(),
            dns,
        });
        if state.fail_set_dns {
            return Err(PlatformError::Interface("resolver update refused".to_string()));
        }
        state.dns.insert(iface.name().to_string(), dns);
        Ok(())
    }
}

impl LeaseControl for MockPlatform {
    fn stop_leasing(&self, iface: &IfaceHandle) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::StopLeasing {
            iface: iface.name().to_string(),
        });
        if state.fail_stop_leasing {
            return Err(PlatformError::Leasing("leasing service wedged".to_string()));
        }
        if !state.leasing_running {
            return Err(PlatformError::AlreadyStopped);
        }
        state.leasing_running = false;
        Ok(())
    }

    fn set_leased_dns_option(&self, iface: &IfaceHandle, dns: Ipv4Addr) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::SetLeasedDnsOption {
            iface: iface.name().to_string(),
            dns,
        });
        if state.fail_dns_option {
            return Err(PlatformError::Leasing("dns option rejected".to_string()));
        }
        Ok(())
    }
}

impl TranslationEngine for MockPlatform {
    fn enable_translation(&self, address: Ipv4Addr) {
        self.record(MockCall::EnableTranslation { address });
    }

    fn add_port_mapping(
        &self,
        protocol: MappingProtocol,
        external_addr: Ipv4Addr,
        external_port: u16,
        internal_addr: Ipv4Addr,
        internal_port: u16,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::AddPortMapping {
            protocol,
            external_addr,
            external_port,
            internal_addr,
            internal_port,
        });
        if state.rejected_ports.contains(&external_port) {
            return Err(PlatformError::Rejected(format!(
                "{protocol} port {external_port} refused"
            )));
        }
        Ok(())
    }
}

impl RadioControl for MockPlatform {
    fn configure_access_point(&self, settings: &ApSettings) -> Result<(), PlatformError> {
        self.record(MockCall::ConfigureAccessPoint(settings.clone()));
        if self.state().fail_radio {
            return Err(PlatformError::Radio("radio unavailable".to_string()));
        }
        Ok(())
    }

    fn start(&self) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::StartRadio);
        if state.fail_start {
            return Err(PlatformError::Radio("radio failed to start".to_string()));
        }
        state.leasing_running = true;
        Ok(())
    }
}

impl EventSource for MockPlatform {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Result<SubscriptionId, PlatformError> {
        self.record(MockCall::Subscribe(kind));
        Ok(self.dispatcher.subscribe(kind, handler))
    }
}
