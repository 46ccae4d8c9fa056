//! Uplink address monitor: the Linux source of `UplinkAddressAcquired`.

use super::LinuxPlatform;
use natap_core::platform::{IfaceHandle, InterfaceProvider, Ipv4Info};
use natap_core::NetEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Edge detector over successive address observations.
#[derive(Debug, Default)]
pub struct UplinkEdge {
    had_address: bool,
}

impl UplinkEdge {
    /// Feed one observation. Returns the address on a no-address → address
    /// transition, `None` otherwise.
    pub fn observe(&mut self, current: Option<Ipv4Info>) -> Option<Ipv4Info> {
        let current = current.filter(Ipv4Info::has_address);
        let rising = !self.had_address && current.is_some();
        if self.had_address && current.is_none() {
            info!("uplink lost its address");
        }
        self.had_address = current.is_some();
        if rising {
            current
        } else {
            None
        }
    }
}

/// Poll the uplink every `every` and dispatch an acquisition event on each
/// rising edge. Probing and dispatch run on the blocking pool since both end
/// up shelling out.
pub fn spawn(platform: Arc<LinuxPlatform>, uplink: IfaceHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut edge = UplinkEdge::default();
        info!(uplink = %uplink, interval = ?every, "uplink monitor started");

        loop {
            ticker.tick().await;
            let poll = {
                let platform = platform.clone();
                let uplink = uplink.clone();
                tokio::task::spawn_blocking(move || platform.interface_address(&uplink)).await
            };
            let current = match poll {
                Ok(current) => current,
                Err(e) => {
                    warn!(error = %e, "uplink poll task failed");
                    continue;
                }
            };

            let Some(info) = edge.observe(current) else {
                continue;
            };
            debug!(address = %info.ip, "uplink address edge detected");
            let platform = platform.clone();
            let delivered = tokio::task::spawn_blocking(move || {
                platform.dispatch(&NetEvent::UplinkAddressAcquired { info })
            })
            .await;
            if let Err(e) = delivered {
                warn!(error = %e, "uplink event dispatch failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(ip: Ipv4Addr) -> Option<Ipv4Info> {
        Some(Ipv4Info {
            ip,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
        })
    }

    #[test]
    fn test_edge_fires_once_per_acquisition() {
        let mut edge = UplinkEdge::default();
        assert!(edge.observe(None).is_none());
        assert!(edge.observe(addr(Ipv4Addr::UNSPECIFIED)).is_none());

        let first = edge.observe(addr(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(first.map(|i| i.ip), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(edge.observe(addr(Ipv4Addr::new(10, 0, 0, 5))).is_none());

        assert!(edge.observe(None).is_none());
        assert!(edge.observe(addr(Ipv4Addr::new(10, 0, 0, 7))).is_some());
    }
}
