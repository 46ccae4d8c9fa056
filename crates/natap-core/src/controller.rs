//! The gateway controller: owns the lifecycle state and wires the
//! configurator, watcher, enablement step and rule table together.
//!
//! # Startup order
//!
//! ```text
//! setup()
//!   → create downlink interface           (fatal on failure)
//!   → resolve uplink interface by name    (fatal on failure)
//!   → configure_downlink                  (never fatal)
//!   → radio: AP settings, AP+STA mode     (fatal on failure)
//!   → subscribe client + uplink handlers  (fatal on failure)
//!   → radio: start
//!   → uplink already addressed? → enable_napt
//! ```
//!
//! After startup the controller is passive: it reacts only to uplink
//! notifications delivered by the platform.

use crate::config::NatApConfig;
use crate::downlink::configure_downlink;
use crate::enablement::{enable_napt, EnableOutcome, NaptState, NaptSwitch};
use crate::error::{SetupError, ValidationError};
use crate::events::{EventKind, NetEvent};
use crate::platform::{IfaceHandle, Platform};
use crate::rules::{ForwardingProtocol, PortForwardingRule, RuleTable};
use crate::watcher::UplinkWatcher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{error, info, warn};

struct Handles {
    downlink: IfaceHandle,
    uplink: IfaceHandle,
}

struct Shared<P> {
    config: NatApConfig,
    platform: Arc<P>,
    handles: OnceLock<Handles>,
    napt: NaptSwitch,
    rules: RuleTable,
    started: AtomicBool,
    /// Set once the radio is up. Notifications before that are ignored.
    ready: AtomicBool,
    failed: AtomicBool,
}

impl<P: Platform> Shared<P> {
    fn trigger_enablement(&self, trigger: &'static str) -> Option<EnableOutcome> {
        if !self.ready.load(Ordering::Acquire) {
            if self.failed.load(Ordering::Acquire) {
                warn!(trigger, "controller halted after failed setup, ignoring trigger");
            }
            return None;
        }
        let handles = self.handles.get()?;
        info!(trigger, "NAPT enablement triggered");
        Some(enable_napt(
            &self.napt,
            &*self.platform,
            &handles.downlink,
            &handles.uplink,
            &self.rules,
        ))
    }
}

/// NAT access-point controller.
///
/// Cheap to clone; clones share the same state. Lives for the whole process.
pub struct NatAp<P: Platform> {
    shared: Arc<Shared<P>>,
}

impl<P: Platform> Clone for NatAp<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: Platform> NatAp<P> {
    /// Build a controller. Rules from `config.port_forwarding` are registered
    /// immediately; entries with an invalid internal address are logged and
    /// dropped individually.
    pub fn new(config: NatApConfig, platform: Arc<P>) -> Self {
        let entries = config.port_forwarding.clone();
        let nat_ap = Self {
            shared: Arc::new(Shared {
                config,
                platform,
                handles: OnceLock::new(),
                napt: NaptSwitch::new(),
                rules: RuleTable::new(),
                started: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                failed: AtomicBool::new(false),
            }),
        };
        for entry in entries {
            let _ = nat_ap.add_port_forwarding_rule(
                entry.protocol,
                entry.external_port,
                &entry.internal_ip,
                entry.internal_port,
            );
        }
        nat_ap
    }

    /// Register a forwarding rule.
    ///
    /// Rules registered after NAPT has been enabled are kept but not applied:
    /// application happens only as part of the enablement transition.
    pub fn add_port_forwarding_rule(
        &self,
        protocol: ForwardingProtocol,
        external_port: u16,
        internal_address: &str,
        internal_port: u16,
    ) -> Result<(), ValidationError> {
        let rule = PortForwardingRule::parse(protocol, external_port, internal_address, internal_port)
            .map_err(|e| {
                error!(internal = %internal_address, error = %e, "invalid forwarding rule rejected");
                e
            })?;
        let count = self.shared.rules.push(rule);
        if self.shared.napt.is_enabled() {
            warn!(%rule, "forwarding rule registered after NAPT was enabled, it will not be applied");
        } else {
            info!(%rule, count, "forwarding rule added, not applied yet");
        }
        Ok(())
    }

    /// Bring the gateway up. Only the first call does anything; later calls
    /// return `Ok(())`, or [`SetupError::Halted`] if the first one failed.
    pub fn setup(&self) -> Result<(), SetupError> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            if self.is_failed() {
                return Err(SetupError::Halted);
            }
            info!("setup already ran, ignoring");
            return Ok(());
        }
        let result = self.run_setup();
        if let Err(e) = &result {
            self.shared.failed.store(true, Ordering::Release);
            error!(error = %e, "gateway setup failed");
        }
        result
    }

    fn run_setup(&self) -> Result<(), SetupError> {
        let shared = &self.shared;
        let platform = &*shared.platform;
        info!("setting up NAT access point");

        let downlink = platform
            .create_downlink_interface()
            .map_err(SetupError::DownlinkUnavailable)?;
        info!(downlink = %downlink, "downlink interface created");

        let uplink_name = shared.config.interfaces.uplink.as_str();
        let uplink = platform
            .uplink_interface(uplink_name)
            .map_err(|source| SetupError::UplinkUnavailable {
                name: uplink_name.to_string(),
                source,
            })?;
        info!(uplink = %uplink, "uplink interface resolved");

        configure_downlink(
            platform,
            &downlink,
            &uplink,
            &shared.config.access_point.ip_address,
        );

        let settings = shared.config.ap_settings();
        platform
            .configure_access_point(&settings)
            .map_err(SetupError::Radio)?;
        info!(ssid = %settings.ssid, hidden = settings.hidden, channel = settings.channel, "access point configured");

        if shared.handles.set(Handles { downlink, uplink }).is_err() {
            warn!("interface handles were already set");
        }

        self.subscribe_handlers()?;

        platform.start().map_err(SetupError::Radio)?;
        info!("radio started (AP + STA)");
        shared.ready.store(true, Ordering::Release);

        let handles = shared.handles.get();
        let ready = handles.and_then(|h| UplinkWatcher::current_address(platform, &h.uplink));
        match ready {
            Some(info) => {
                info!(address = %info.ip, "uplink already has an address, enabling NAPT now");
                shared.trigger_enablement("startup");
            }
            None => info!("NAT access point ready, waiting for uplink address"),
        }
        Ok(())
    }

    fn subscribe_handlers(&self) -> Result<(), SetupError> {
        let platform = &*self.shared.platform;

        let weak: Weak<Shared<P>> = Arc::downgrade(&self.shared);
        UplinkWatcher::subscribe(platform, move |_info| {
            if let Some(shared) = weak.upgrade() {
                shared.trigger_enablement("uplink event");
            }
        })
        .map_err(SetupError::Subscription)?;

        for kind in [EventKind::ClientConnected, EventKind::ClientDisconnected] {
            platform
                .subscribe(kind, Box::new(log_client_event))
                .map_err(SetupError::Subscription)?;
        }
        info!("event handlers registered");
        Ok(())
    }

    /// Periodic hook from the host. There is no recurring work.
    pub fn tick(&self) {}

    pub fn is_napt_enabled(&self) -> bool {
        self.shared.napt.is_enabled()
    }

    pub fn napt_state(&self) -> NaptState {
        self.shared.napt.state()
    }

    /// True once `setup` has failed. The controller stays halted.
    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Registered rules in registration order.
    pub fn rules(&self) -> Vec<PortForwardingRule> {
        self.shared.rules.snapshot()
    }

    pub fn config(&self) -> &NatApConfig {
        &self.shared.config
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.shared.platform
    }
}

fn log_client_event(event: &NetEvent) {
    match event {
        NetEvent::ClientConnected { mac, aid } => {
            info!(mac = %mac, aid, "client connected to access point");
        }
        NetEvent::ClientDisconnected { mac, aid, reason } => {
            info!(mac = %mac, aid, reason, "client disconnected from access point");
        }
        NetEvent::UplinkAddressAcquired { .. } => {}
    }
}
