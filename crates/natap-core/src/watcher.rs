//! Detection of uplink address acquisition.

use crate::error::PlatformError;
use crate::events::{EventKind, NetEvent, SubscriptionId};
use crate::platform::{EventSource, IfaceHandle, InterfaceProvider, Ipv4Info};
use tracing::info;

/// Subscribes to uplink address notifications and performs the one-off
/// startup check.
///
/// All methods are static; the struct exists only for namespacing.
pub struct UplinkWatcher;

impl UplinkWatcher {
    /// Register `on_acquired` for every uplink address acquisition. The
    /// subscription is never removed during normal operation.
    pub fn subscribe<S, F>(source: &S, on_acquired: F) -> Result<SubscriptionId, PlatformError>
    where
        S: EventSource + ?Sized,
        F: Fn(&Ipv4Info) + Send + Sync + 'static,
    {
        source.subscribe(
            EventKind::UplinkAddressAcquired,
            Box::new(move |event| {
                if let NetEvent::UplinkAddressAcquired { info } = event {
                    info!(address = %info.ip, "uplink obtained address");
                    on_acquired(info);
                }
            }),
        )
    }

    /// The uplink's address if it already holds a non-zero one. Used once at
    /// the end of startup to cover an acquisition that happened before the
    /// subscription existed.
    pub fn current_address<P>(platform: &P, uplink: &IfaceHandle) -> Option<Ipv4Info>
    where
        P: InterfaceProvider + ?Sized,
    {
        platform
            .interface_address(uplink)
            .filter(|info| info.has_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_callback_runs_per_acquisition() {
        let platform = MockPlatform::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        UplinkWatcher::subscribe(&platform, move |info| {
            assert_eq!(info.ip, Ipv4Addr::new(10, 0, 0, 5));
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        platform.acquire_uplink(Ipv4Addr::new(10, 0, 0, 5));
        platform.acquire_uplink(Ipv4Addr::new(10, 0, 0, 5));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(platform.subscriber_count(EventKind::UplinkAddressAcquired), 1);
    }

    #[test]
    fn test_current_address_ignores_unspecified() {
        let platform = MockPlatform::new();
        let uplink = IfaceHandle::new(MockPlatform::UPLINK);
        assert!(UplinkWatcher::current_address(&platform, &uplink).is_none());

        platform.set_uplink_address(Some(Ipv4Addr::UNSPECIFIED));
        assert!(UplinkWatcher::current_address(&platform, &uplink).is_none());

        platform.set_uplink_address(Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            UplinkWatcher::current_address(&platform, &uplink).map(|i| i.ip),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
    }
}
