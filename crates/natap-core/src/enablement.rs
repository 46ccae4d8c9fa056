//! The one-way NAPT enablement transition.
//!
//! `Disabled -> Enabled` happens at most once per controller. The guard is a
//! single compare-and-set on [`NaptSwitch`], so the uplink notification and
//! the startup check can race without both firing. The winner holds the
//! transient `Enabling` state while it reads the downlink address; if the
//! address is missing it puts the switch back to `Disabled` so a later
//! trigger can retry.

use crate::platform::{IfaceHandle, InterfaceProvider, TranslationEngine};
use crate::rules::{apply_rules, ApplyReport, RuleTable};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{error, info};

const DISABLED: u8 = 0;
const ENABLING: u8 = 1;
const ENABLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaptState {
    Disabled,
    Enabling,
    Enabled,
}

/// Atomic holder of the [`NaptState`].
#[derive(Debug, Default)]
pub struct NaptSwitch {
    state: AtomicU8,
}

impl NaptSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NaptState {
        match self.state.load(Ordering::Acquire) {
            DISABLED => NaptState::Disabled,
            ENABLING => NaptState::Enabling,
            _ => NaptState::Enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == NaptState::Enabled
    }

    /// Claim the transition. Only one caller ever gets `Ok` while disabled.
    fn begin(&self) -> Result<(), NaptState> {
        self.state
            .compare_exchange(DISABLED, ENABLING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| if current == ENABLING { NaptState::Enabling } else { NaptState::Enabled })
    }

    fn release(&self) {
        self.state.store(DISABLED, Ordering::Release);
    }

    fn finish(&self) {
        self.state.store(ENABLED, Ordering::Release);
    }
}

/// Result of one trigger of the enablement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    /// This trigger performed the transition and ran the applier.
    Enabled { address: Ipv4Addr, rules: ApplyReport },
    /// Someone else already enabled (or is enabling) translation.
    AlreadyEnabled,
    /// The downlink had no address; nothing changed.
    DownlinkUnavailable,
}

/// Run the enablement step: enable translation for the downlink's address,
/// then apply every registered rule against the uplink.
pub fn enable_napt<P>(
    switch: &NaptSwitch,
    platform: &P,
    downlink: &IfaceHandle,
    uplink: &IfaceHandle,
    rules: &RuleTable,
) -> EnableOutcome
where
    P: InterfaceProvider + TranslationEngine + ?Sized,
{
    if let Err(state) = switch.begin() {
        info!(?state, "NAPT already enabled, nothing to do");
        return EnableOutcome::AlreadyEnabled;
    }

    info!("enabling NAPT");
    let address = match platform.interface_address(downlink) {
        Some(info) if info.has_address() => info.ip,
        _ => {
            switch.release();
            error!(downlink = %downlink, "downlink has no address, NAPT not enabled");
            return EnableOutcome::DownlinkUnavailable;
        }
    };

    platform.enable_translation(address);
    switch.finish();
    info!(address = %address, "NAPT enabled on downlink address");

    let report = apply_rules(&rules.snapshot(), platform, uplink);
    EnableOutcome::Enabled {
        address,
        rules: report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MockCall, MockPlatform};
    use crate::rules::{ForwardingProtocol, PortForwardingRule};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn setup() -> (MockPlatform, IfaceHandle, IfaceHandle, RuleTable) {
        let platform = MockPlatform::new();
        let ap = IfaceHandle::new(MockPlatform::DOWNLINK);
        let sta = IfaceHandle::new(MockPlatform::UPLINK);
        crate::downlink::configure_downlink(&platform, &ap, &sta, "192.168.4.1");
        (platform, ap, sta, RuleTable::new())
    }

    #[test]
    fn test_enable_once_then_noop() {
        let (platform, ap, sta, rules) = setup();
        let switch = NaptSwitch::new();
        platform.set_uplink_address(Some(Ipv4Addr::new(10, 0, 0, 5)));

        let first = enable_napt(&switch, &platform, &ap, &sta, &rules);
        assert!(matches!(first, EnableOutcome::Enabled { address, .. } if address == Ipv4Addr::new(192, 168, 4, 1)));
        assert!(switch.is_enabled());

        let second = enable_napt(&switch, &platform, &ap, &sta, &rules);
        assert_eq!(second, EnableOutcome::AlreadyEnabled);
        assert_eq!(platform.translation_enables(), 1);
    }

    #[test]
    fn test_missing_downlink_address_is_retryable() {
        let (platform, ap, sta, rules) = setup();
        platform.clear_downlink_address();
        let switch = NaptSwitch::new();

        let outcome = enable_napt(&switch, &platform, &ap, &sta, &rules);
        assert_eq!(outcome, EnableOutcome::DownlinkUnavailable);
        assert_eq!(switch.state(), NaptState::Disabled);
        assert!(platform.engine_calls().is_empty());

        crate::downlink::configure_downlink(&platform, &ap, &sta, "192.168.4.1");
        let outcome = enable_napt(&switch, &platform, &ap, &sta, &rules);
        assert!(matches!(outcome, EnableOutcome::Enabled { .. }));
    }

    #[test]
    fn test_rules_applied_after_enable() {
        let (platform, ap, sta, rules) = setup();
        rules.push(
            PortForwardingRule::parse(ForwardingProtocol::Tcp, 8080, "192.168.4.50", 80).unwrap(),
        );
        platform.set_uplink_address(Some(Ipv4Addr::new(10, 0, 0, 5)));
        let switch = NaptSwitch::new();

        enable_napt(&switch, &platform, &ap, &sta, &rules);

        assert_eq!(
            platform.engine_calls(),
            vec![
                MockCall::EnableTranslation {
                    address: Ipv4Addr::new(192, 168, 4, 1)
                },
                MockCall::AddPortMapping {
                    protocol: crate::rules::MappingProtocol::Tcp,
                    external_addr: Ipv4Addr::new(10, 0, 0, 5),
                    external_port: 8080,
                    internal_addr: Ipv4Addr::new(192, 168, 4, 50),
                    internal_port: 80,
                },
            ]
        );
    }

    #[test]
    fn test_concurrent_triggers_enable_once() {
        let (platform, ap, sta, rules) = setup();
        platform.set_uplink_address(Some(Ipv4Addr::new(10, 0, 0, 5)));
        let platform = Arc::new(platform);
        let switch = Arc::new(NaptSwitch::new());
        let rules = Arc::new(rules);
        let barrier = Arc::new(Barrier::new(8));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let (platform, switch, rules, barrier) =
                    (platform.clone(), switch.clone(), rules.clone(), barrier.clone());
                let (ap, sta) = (ap.clone(), sta.clone());
                thread::spawn(move || {
                    barrier.wait();
                    enable_napt(&*switch, &*platform, &ap, &sta, &rules)
                })
            })
            .collect();

        let winners = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|o| matches!(o, EnableOutcome::Enabled { .. }))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(platform.translation_enables(), 1);
        assert!(switch.is_enabled());
    }
}
