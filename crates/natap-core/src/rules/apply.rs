//! Pushes the rule table to the translation engine.

use super::PortForwardingRule;
use crate::platform::{IfaceHandle, InterfaceProvider, TranslationEngine};
use tracing::{error, info, warn};

/// Outcome of one application pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// The pass did nothing: no rules, or the uplink has no address yet.
    pub skipped: bool,
    /// Engine mapping requests issued.
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
}

/// Apply `rules` in order, using the uplink's current address as the external
/// address of every mapping.
///
/// Each mapping request stands alone: a rejection is logged and counted and
/// the next request is still issued. If the uplink has no address the whole
/// pass is skipped and nothing is marked as applied; no retry is scheduled.
pub fn apply_rules<P>(rules: &[PortForwardingRule], platform: &P, uplink: &IfaceHandle) -> ApplyReport
where
    P: InterfaceProvider + TranslationEngine + ?Sized,
{
    if rules.is_empty() {
        info!("no port forwarding rules to apply");
        return ApplyReport {
            skipped: true,
            ..ApplyReport::default()
        };
    }

    let external = match platform.interface_address(uplink) {
        Some(info) if info.has_address() => info.ip,
        _ => {
            error!(
                uplink = %uplink,
                "uplink has no address, port forwarding rules not applied"
            );
            return ApplyReport {
                skipped: true,
                ..ApplyReport::default()
            };
        }
    };

    info!(count = rules.len(), external = %external, "applying port forwarding rules");

    let mut report = ApplyReport::default();
    for rule in rules {
        for &protocol in rule.protocol.mappings() {
            report.attempted += 1;
            match platform.add_port_mapping(
                protocol,
                external,
                rule.external_port,
                rule.internal_address,
                rule.internal_port,
            ) {
                Ok(()) => {
                    report.applied += 1;
                    info!(
                        protocol = %protocol,
                        external = %format_args!("{}:{}", external, rule.external_port),
                        internal = %format_args!("{}:{}", rule.internal_address, rule.internal_port),
                        "port forwarding rule applied"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        protocol = %protocol,
                        external_port = rule.external_port,
                        internal = %format_args!("{}:{}", rule.internal_address, rule.internal_port),
                        error = %e,
                        "port mapping rejected"
                    );
                }
            }
        }
    }
    report
}
