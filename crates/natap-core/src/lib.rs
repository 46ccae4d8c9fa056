//! natap-core: lifecycle controller for a NAT access-point gateway.
//!
//! Brings up a downlink (access-point) interface with a static address,
//! relays the uplink's DNS server to downlink clients, enables address
//! translation exactly once when the uplink acquires an address, and applies
//! the registered port-forwarding rules at that moment.
//!
//! The host platform is abstracted behind the traits in [`platform`]; the
//! crate ships an in-memory [`MockPlatform`] for tests.

pub mod config;
pub mod controller;
pub mod downlink;
pub mod enablement;
pub mod error;
pub mod events;
pub mod platform;
pub mod rules;
pub mod watcher;

// Re-export commonly used items at crate root.
pub use config::{NatApConfig, DEFAULT_AP_ADDR};
pub use controller::NatAp;
pub use enablement::{EnableOutcome, NaptState};
pub use error::{ConfigError, NatApError, NatApResult, PlatformError, SetupError, ValidationError};
pub use events::{EventDispatcher, EventKind, MacAddr, NetEvent};
pub use platform::{IfaceHandle, Ipv4Info, MockPlatform, Platform};
pub use rules::{ForwardingProtocol, MappingProtocol, PortForwardingRule};
