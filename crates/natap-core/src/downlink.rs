//! Static addressing for the access-point interface.
//!
//! Runs once at startup. Nothing in here aborts startup: every failure is
//! logged, recorded in the [`DownlinkReport`], and configuration moves on.

use crate::config::DEFAULT_AP_ADDR;
use crate::error::PlatformError;
use crate::platform::{IfaceHandle, InterfaceProvider, Ipv4Info, LeaseControl};
use std::net::Ipv4Addr;
use tracing::{error, info, warn};

/// Fixed downlink netmask (/24).
pub const DOWNLINK_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// What [`configure_downlink`] actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkReport {
    /// Address/netmask/gateway that was requested from the platform.
    pub requested: Ipv4Info,
    /// The configured text did not parse and the default was used.
    pub fell_back: bool,
    /// The platform accepted the static address.
    pub address_assigned: bool,
    /// Uplink DNS server relayed to downlink clients, if any.
    pub dns_relayed: Option<Ipv4Addr>,
}

/// Parse the configured access-point address, falling back to
/// [`DEFAULT_AP_ADDR`]. The returned flag is true when the fallback was used.
pub fn resolve_ap_address(desired: &str) -> (Ipv4Addr, bool) {
    match desired.trim().parse::<Ipv4Addr>() {
        Ok(ip) if !ip.is_unspecified() && !ip.is_broadcast() => (ip, false),
        _ => (DEFAULT_AP_ADDR, true),
    }
}

/// Assign `desired_address` (gateway = same address, netmask /24) to the
/// downlink, with the leasing service stopped, then relay the uplink's DNS
/// server to downlink clients if the uplink already has one.
///
/// The DNS relay is attempted exactly once, here. If the uplink only learns
/// its resolver later, downlink clients keep whatever default they get.
pub fn configure_downlink<P>(
    platform: &P,
    downlink: &IfaceHandle,
    uplink: &IfaceHandle,
    desired_address: &str,
) -> DownlinkReport
where
    P: InterfaceProvider + LeaseControl + ?Sized,
{
    info!(downlink = %downlink, "configuring downlink (static address, DNS relay)");

    match platform.stop_leasing(downlink) {
        Ok(()) | Err(PlatformError::AlreadyStopped) => {}
        Err(e) => warn!(downlink = %downlink, error = %e, "stopping address leasing failed"),
    }

    let (ip, fell_back) = resolve_ap_address(desired_address);
    if fell_back {
        error!(
            configured = %desired_address,
            fallback = %DEFAULT_AP_ADDR,
            "invalid access point address, using default"
        );
    }

    let requested = Ipv4Info {
        ip,
        netmask: DOWNLINK_NETMASK,
        gateway: ip,
    };

    let address_assigned = match platform.set_interface_address(downlink, requested) {
        Ok(()) => {
            info!(downlink = %downlink, address = %ip, "static downlink address configured");
            true
        }
        Err(e) => {
            error!(downlink = %downlink, error = %e, "assigning downlink address failed");
            false
        }
    };

    let dns_relayed = relay_dns(platform, downlink, uplink);

    DownlinkReport {
        requested,
        fell_back,
        address_assigned,
        dns_relayed,
    }
}

fn relay_dns<P>(platform: &P, downlink: &IfaceHandle, uplink: &IfaceHandle) -> Option<Ipv4Addr>
where
    P: InterfaceProvider + LeaseControl + ?Sized,
{
    let Some(dns) = platform.dns_server(uplink) else {
        warn!(
            uplink = %uplink,
            "uplink has no DNS server yet, downlink clients get the default resolver"
        );
        return None;
    };
    info!(dns = %dns, "DNS server learned from uplink");

    if let Err(e) = platform.set_leased_dns_option(downlink, dns) {
        warn!(error = %e, "enabling DNS offer in lease responses failed");
    }

    match platform.set_dns_server(downlink, dns) {
        Ok(()) => {
            info!(dns = %dns, "downlink clients will be offered uplink DNS");
            Some(dns)
        }
        Err(e) => {
            warn!(error = %e, "setting downlink DNS server failed");
            None
        }
    }
}
