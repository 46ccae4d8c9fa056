//! Linux platform: `ip`, `iw`, `hostapd`, `dnsmasq` and `iptables`.
//!
//! Every state-changing step goes through [`CommandRunner`], so `--dry-run`
//! prints the plan without touching the host. Installed iptables rules are
//! remembered and deleted again on [`LinuxPlatform::shutdown`].

mod command;
pub mod monitor;
mod parse;

use natap_core::events::{EventDispatcher, EventHandler, EventKind, NetEvent, SubscriptionId};
use natap_core::platform::{
    ApSettings, EventSource, IfaceHandle, InterfaceProvider, Ipv4Info, LeaseControl,
    RadioControl, TranslationEngine,
};
use command::CommandRunner;
use natap_core::{MappingProtocol, PlatformError, DEFAULT_AP_ADDR};
use parse::{
    dnsmasq_args, first_nameserver, netmask_to_prefix, network_of, parse_default_route,
    parse_ip_addr_output, prefix_to_netmask, render_hostapd_conf,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

const RESOLV_CONF: &str = "/etc/resolv.conf";
/// Real upstream servers when `/etc/resolv.conf` points at systemd-resolved's stub.
const RESOLVED_UPSTREAM_CONF: &str = "/run/systemd/resolve/resolv.conf";
const IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

/// Static options for the Linux backend.
#[derive(Debug, Clone)]
pub struct LinuxOptions {
    pub downlink: String,
    pub uplink: String,
    pub runtime_dir: PathBuf,
    /// iptables binary, e.g. `iptables-legacy` on hosts that ship both.
    pub iptables: String,
    pub dry_run: bool,
}

#[derive(Default)]
struct LinuxState {
    /// Addresses assigned by us; consulted for the downlink in dry-run mode.
    assigned: HashMap<String, Ipv4Info>,
    resolvers: HashMap<String, Ipv4Addr>,
    leased_dns: Option<Ipv4Addr>,
    hostapd_conf: Option<PathBuf>,
    hostapd: Option<Child>,
    dnsmasq: Option<Child>,
    /// `iptables` argument lists that were appended, for teardown.
    installed: Vec<Vec<String>>,
}

pub struct LinuxPlatform {
    options: LinuxOptions,
    runner: CommandRunner,
    state: Mutex<LinuxState>,
    dispatcher: EventDispatcher,
}

impl LinuxPlatform {
    pub fn new(options: LinuxOptions) -> Self {
        Self {
            runner: CommandRunner::new(options.dry_run),
            options,
            state: Mutex::new(LinuxState::default()),
            dispatcher: EventDispatcher::new(),
        }
    }

    pub fn options(&self) -> &LinuxOptions {
        &self.options
    }

    fn state(&self) -> MutexGuard<'_, LinuxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a notification to subscribers. Returns how many handlers ran.
    pub fn dispatch(&self, event: &NetEvent) -> usize {
        self.dispatcher.dispatch(event)
    }

    /// Stop the daemons we started and delete the iptables rules we added.
    pub fn shutdown(&self) {
        let mut state = self.state();
        for (name, child) in [("dnsmasq", state.dnsmasq.take()), ("hostapd", state.hostapd.take())] {
            if let Some(child) = child {
                stop_child(name, child);
            }
        }
        for rule in state.installed.drain(..).rev() {
            let args: Vec<&str> = rule.iter().map(String::as_str).collect();
            self.delete_iptables_rule(&args);
        }
        info!("linux platform torn down");
    }

    fn link_exists(&self, name: &str) -> bool {
        self.runner.read("ip", &["link", "show", "dev", name]).is_ok()
    }

    fn iptables(&self, args: &[&str]) -> Result<(), PlatformError> {
        self.runner.run(&self.options.iptables, args)?;
        self.state()
            .installed
            .push(args.iter().map(|a| a.to_string()).collect());
        Ok(())
    }

    /// Run the `-D` form of an appended rule. Does not touch the bookkeeping.
    fn delete_iptables_rule(&self, appended: &[&str]) {
        let args: Vec<&str> = appended
            .iter()
            .map(|a| if *a == "-A" { "-D" } else { *a })
            .collect();
        if let Err(e) = self.runner.run(&self.options.iptables, &args) {
            warn!(error = %e, "failed to remove iptables rule");
        }
    }

    /// Delete a rule appended by [`Self::iptables`] and forget it.
    fn rollback_iptables(&self, appended: &[&str]) {
        self.delete_iptables_rule(appended);
        let mut state = self.state();
        let pos = state
            .installed
            .iter()
            .rposition(|rule| rule.iter().map(String::as_str).eq(appended.iter().copied()));
        if let Some(pos) = pos {
            state.installed.remove(pos);
        }
    }

    fn downlink_address(&self) -> Ipv4Addr {
        self.state()
            .assigned
            .get(&self.options.downlink)
            .map(|info| info.ip)
            .unwrap_or(DEFAULT_AP_ADDR)
    }

    fn start_dnsmasq(&self) -> Result<(), PlatformError> {
        let dns = self.state().leased_dns;
        let args = dnsmasq_args(&self.options.downlink, self.downlink_address(), dns);
        let child = self.runner.spawn("dnsmasq", &args)?;
        let mut state = self.state();
        if let Some(old) = state.dnsmasq.take() {
            stop_child("dnsmasq", old);
        }
        state.dnsmasq = child;
        Ok(())
    }
}

impl Drop for LinuxPlatform {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        for (name, child) in [("dnsmasq", state.dnsmasq.take()), ("hostapd", state.hostapd.take())] {
            if let Some(child) = child {
                stop_child(name, child);
            }
        }
    }
}

fn stop_child(name: &str, mut child: Child) {
    if let Err(e) = child.kill() {
        warn!(process = name, error = %e, "failed to kill child process");
    }
    let _ = child.wait();
    info!(process = name, "child process stopped");
}

impl InterfaceProvider for LinuxPlatform {
    fn create_downlink_interface(&self) -> Result<IfaceHandle, PlatformError> {
        let name = &self.options.downlink;
        if !self.link_exists(name) {
            info!(downlink = %name, uplink = %self.options.uplink, "creating virtual AP interface");
            self.runner
                .run(
                    "iw",
                    &["dev", &self.options.uplink, "interface", "add", name, "type", "__ap"],
                )
                .map_err(|e| PlatformError::Interface(e.to_string()))?;
        }
        self.runner
            .run("ip", &["link", "set", name, "up"])
            .map_err(|e| PlatformError::Interface(e.to_string()))?;
        Ok(IfaceHandle::new(name.as_str()))
    }

    fn uplink_interface(&self, name: &str) -> Result<IfaceHandle, PlatformError> {
        if !self.link_exists(name) {
            return Err(PlatformError::Interface(format!("no interface named {name}")));
        }
        Ok(IfaceHandle::new(name))
    }

    fn interface_address(&self, iface: &IfaceHandle) -> Option<Ipv4Info> {
        let live = self
            .runner
            .read("ip", &["-4", "-o", "addr", "show", "dev", iface.name()])
            .ok()
            .and_then(|out| parse_ip_addr_output(&out));

        let Some((ip, prefix)) = live else {
            if self.runner.dry_run() {
                return self.state().assigned.get(iface.name()).copied();
            }
            return None;
        };

        let gateway = self
            .runner
            .read("ip", &["-4", "route", "show", "default", "dev", iface.name()])
            .ok()
            .and_then(|out| parse_default_route(&out))
            .unwrap_or(ip);

        Some(Ipv4Info {
            ip,
            netmask: prefix_to_netmask(prefix),
            gateway,
        })
    }

    fn set_interface_address(&self, iface: &IfaceHandle, info: Ipv4Info) -> Result<(), PlatformError> {
        let cidr = format!("{}/{}", info.ip, netmask_to_prefix(info.netmask));
        let map = |e: PlatformError| PlatformError::Interface(e.to_string());
        self.runner
            .run("ip", &["addr", "flush", "dev", iface.name()])
            .map_err(map)?;
        self.runner
            .run("ip", &["addr", "add", &cidr, "dev", iface.name()])
            .map_err(map)?;
        self.state().assigned.insert(iface.name().to_string(), info);
        Ok(())
    }

    fn dns_server(&self, iface: &IfaceHandle) -> Option<Ipv4Addr> {
        if let Some(dns) = self.state().resolvers.get(iface.name()) {
            return Some(*dns);
        }
        if iface.name() != self.options.uplink {
            return None;
        }
        // The system resolver only counts once the uplink is actually up.
        self.interface_address(iface).filter(Ipv4Info::has_address)?;
        first_nameserver(&[Path::new(RESOLV_CONF), Path::new(RESOLVED_UPSTREAM_CONF)])
    }

    fn set_dns_server(&self, iface: &IfaceHandle, dns: Ipv4Addr) -> Result<(), PlatformError> {
        self.state().resolvers.insert(iface.name().to_string(), dns);
        Ok(())
    }
}

impl LeaseControl for LinuxPlatform {
    fn stop_leasing(&self, _iface: &IfaceHandle) -> Result<(), PlatformError> {
        let child = self.state().dnsmasq.take();
        match child {
            Some(child) => {
                stop_child("dnsmasq", child);
                Ok(())
            }
            None => Err(PlatformError::AlreadyStopped),
        }
    }

    fn set_leased_dns_option(&self, _iface: &IfaceHandle, dns: Ipv4Addr) -> Result<(), PlatformError> {
        self.state().leased_dns = Some(dns);
        Ok(())
    }
}

impl TranslationEngine for LinuxPlatform {
    fn enable_translation(&self, address: Ipv4Addr) {
        if let Err(e) = self.runner.write_file(Path::new(IP_FORWARD), "1\n") {
            error!(error = %e, "failed to enable IP forwarding");
        }

        let netmask = self
            .state()
            .assigned
            .get(&self.options.downlink)
            .map(|info| info.netmask)
            .unwrap_or(natap_core::downlink::DOWNLINK_NETMASK);
        let source = format!("{}/{}", network_of(address, netmask), netmask_to_prefix(netmask));
        let (down, up) = (self.options.downlink.as_str(), self.options.uplink.as_str());

        let rules = [
            vec!["-t", "nat", "-A", "POSTROUTING", "-s", &source, "-o", up, "-j", "MASQUERADE"],
            vec!["-A", "FORWARD", "-i", down, "-o", up, "-j", "ACCEPT"],
            vec![
                "-A", "FORWARD", "-i", up, "-o", down, "-m", "conntrack", "--ctstate",
                "RELATED,ESTABLISHED", "-j", "ACCEPT",
            ],
        ];
        for rule in rules {
            if let Err(e) = self.iptables(&rule) {
                error!(error = %e, "failed to install translation rule");
            }
        }
        info!(source = %source, uplink = up, "masquerading enabled");
    }

    fn add_port_mapping(
        &self,
        protocol: MappingProtocol,
        external_addr: Ipv4Addr,
        external_port: u16,
        internal_addr: Ipv4Addr,
        internal_port: u16,
    ) -> Result<(), PlatformError> {
        let ext_ip = external_addr.to_string();
        let ext_port = external_port.to_string();
        let int_port = internal_port.to_string();
        let target = format!("{internal_addr}:{internal_port}");
        let int_ip = internal_addr.to_string();
        let up = self.options.uplink.as_str();

        let dnat = [
            "-t", "nat", "-A", "PREROUTING", "-i", up, "-p", protocol.as_str(), "-d", &ext_ip,
            "--dport", &ext_port, "-j", "DNAT", "--to-destination", &target,
        ];
        self.iptables(&dnat)
            .map_err(|e| PlatformError::Rejected(e.to_string()))?;

        let forward = [
            "-A", "FORWARD", "-i", up, "-p", protocol.as_str(), "-d", &int_ip, "--dport",
            &int_port, "-j", "ACCEPT",
        ];
        if let Err(e) = self.iptables(&forward) {
            warn!(%protocol, external_port, error = %e, "forward rule failed, removing DNAT");
            self.rollback_iptables(&dnat);
            return Err(PlatformError::Rejected(e.to_string()));
        }
        Ok(())
    }
}

impl RadioControl for LinuxPlatform {
    fn configure_access_point(&self, settings: &ApSettings) -> Result<(), PlatformError> {
        let conf = render_hostapd_conf(&self.options.downlink, settings);
        let dir = &self.options.runtime_dir;
        if !self.runner.dry_run() {
            std::fs::create_dir_all(dir).map_err(|e| {
                PlatformError::Radio(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        let path = dir.join("hostapd.conf");
        self.runner
            .write_file(&path, &conf)
            .map_err(|e| PlatformError::Radio(e.to_string()))?;
        self.state().hostapd_conf = Some(path);
        Ok(())
    }

    fn start(&self) -> Result<(), PlatformError> {
        let conf = self
            .state()
            .hostapd_conf
            .clone()
            .ok_or_else(|| PlatformError::Radio("access point not configured".to_string()))?;
        let hostapd = self
            .runner
            .spawn("hostapd", &[conf.to_string_lossy().into_owned()])
            .map_err(|e| PlatformError::Radio(e.to_string()))?;
        self.state().hostapd = hostapd;

        self.start_dnsmasq()
            .map_err(|e| PlatformError::Radio(format!("DHCP server: {e}")))?;
        info!(downlink = %self.options.downlink, "hostapd and dnsmasq started");
        Ok(())
    }
}

impl EventSource for LinuxPlatform {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Result<SubscriptionId, PlatformError> {
        Ok(self.dispatcher.subscribe(kind, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dry_platform(dir: &Path) -> LinuxPlatform {
        LinuxPlatform::new(LinuxOptions {
            downlink: "natap-test-ap0".to_string(),
            uplink: "natap-test-wlan0".to_string(),
            runtime_dir: dir.to_path_buf(),
            iptables: "iptables".to_string(),
            dry_run: true,
        })
    }

    /// A stand-in iptables that logs its arguments and rejects FORWARD appends.
    #[cfg(unix)]
    fn forward_rejecting_iptables(dir: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("iptables.log");
        let script = dir.join("iptables");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$*\" >> '{}'\ncase \"$*\" in\n  *\"-A FORWARD\"*) echo 'no chain' >&2; exit 1 ;;\nesac\nexit 0\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[test]
    fn test_stop_leasing_without_dnsmasq_is_already_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let platform = dry_platform(dir.path());
        let ap = IfaceHandle::new("natap-test-ap0");
        assert_eq!(platform.stop_leasing(&ap), Err(PlatformError::AlreadyStopped));
    }

    #[test]
    fn test_dry_run_remembers_assigned_downlink_address() {
        let dir = tempfile::tempdir().unwrap();
        let platform = dry_platform(dir.path());
        let ap = IfaceHandle::new("natap-test-ap0");
        let info = Ipv4Info {
            ip: Ipv4Addr::new(192, 168, 4, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 4, 1),
        };
        platform.set_interface_address(&ap, info).unwrap();
        assert_eq!(platform.interface_address(&ap), Some(info));
    }

    #[test]
    fn test_downlink_resolver_kept_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let platform = dry_platform(dir.path());
        let ap = IfaceHandle::new("natap-test-ap0");
        assert_eq!(platform.dns_server(&ap), None);
        platform.set_dns_server(&ap, Ipv4Addr::new(1, 1, 1, 1)).unwrap();
        assert_eq!(platform.dns_server(&ap), Some(Ipv4Addr::new(1, 1, 1, 1)));
    }

    #[test]
    fn test_translation_rules_recorded_for_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let platform = dry_platform(dir.path());
        platform.enable_translation(Ipv4Addr::new(192, 168, 4, 1));
        platform
            .add_port_mapping(
                MappingProtocol::Tcp,
                Ipv4Addr::new(10, 0, 0, 5),
                8080,
                Ipv4Addr::new(192, 168, 4, 50),
                80,
            )
            .unwrap();

        {
            let state = platform.state();
            assert_eq!(state.installed.len(), 5);
            assert!(state.installed[0].contains(&"192.168.4.0/24".to_string()));
            assert!(state.installed[3].contains(&"192.168.4.50:80".to_string()));
        }
        platform.shutdown();
        assert!(platform.state().installed.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_port_mapping_removes_dnat_when_forward_rule_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (script, log) = forward_rejecting_iptables(dir.path());
        let platform = LinuxPlatform::new(LinuxOptions {
            downlink: "natap-test-ap0".to_string(),
            uplink: "natap-test-wlan0".to_string(),
            runtime_dir: dir.path().to_path_buf(),
            iptables: script.display().to_string(),
            dry_run: false,
        });

        let result = platform.add_port_mapping(
            MappingProtocol::Udp,
            Ipv4Addr::new(10, 0, 0, 5),
            5353,
            Ipv4Addr::new(192, 168, 4, 50),
            53,
        );
        assert!(matches!(result, Err(PlatformError::Rejected(_))));
        assert!(platform.state().installed.is_empty());

        let calls = std::fs::read_to_string(&log).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("-A PREROUTING"));
        assert!(calls[1].contains("-A FORWARD"));
        assert!(calls[2].starts_with("-t nat -D PREROUTING"));
        assert!(calls[2].contains("--to-destination 192.168.4.50:53"));
    }

    #[test]
    fn test_start_requires_configured_radio() {
        let dir = tempfile::tempdir().unwrap();
        let platform = dry_platform(dir.path());
        assert!(matches!(platform.start(), Err(PlatformError::Radio(_))));

        platform
            .configure_access_point(&natap_core::NatApConfig::default().ap_settings())
            .unwrap();
        assert!(platform.start().is_ok());
        assert!(!dir.path().join("hostapd.conf").exists());
    }

    #[test]
    fn test_subscribe_and_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let platform = dry_platform(dir.path());
        platform
            .subscribe(EventKind::UplinkAddressAcquired, Box::new(|_| {}))
            .unwrap();
        let info = Ipv4Info {
            ip: Ipv4Addr::new(10, 0, 0, 5),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
        };
        assert_eq!(platform.dispatch(&NetEvent::UplinkAddressAcquired { info }), 1);
    }
}
