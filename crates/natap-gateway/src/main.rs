//! natap-gateway: NAT access-point daemon for Linux.
//!
//! Brings up an access point next to the existing station link, hands out
//! addresses on it with dnsmasq, and masquerades its traffic out through the
//! uplink as soon as the uplink has an address.

mod config;
mod linux;

use clap::Parser;
use config::{GatewayConfig, Overrides};
use linux::{LinuxOptions, LinuxPlatform};
use natap_core::platform::IfaceHandle;
use natap_core::NatAp;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// natap-gateway: NAT access-point gateway
#[derive(Parser, Debug)]
#[command(name = "natap-gateway", version, about = "NAT access-point gateway")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.natap/config.toml")]
    config: String,

    /// Access point address (overrides access_point.ip_address)
    #[arg(long)]
    ap_ip: Option<String>,

    /// Downlink (access point) interface name
    #[arg(long)]
    downlink: Option<String>,

    /// Uplink (station) interface name
    #[arg(long)]
    uplink: Option<String>,

    /// Uplink address poll interval in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Log state-changing commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dry_run = cli.dry_run,
        "starting natap-gateway"
    );

    let overrides = Overrides {
        ap_ip: cli.ap_ip,
        downlink: cli.downlink,
        uplink: cli.uplink,
        poll_interval_secs: cli.poll_interval,
        dry_run: cli.dry_run,
    };
    let config = match GatewayConfig::load(&PathBuf::from(&cli.config), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = ?e, "failed to load config");
            std::process::exit(1);
        }
    };

    let platform = Arc::new(LinuxPlatform::new(LinuxOptions {
        downlink: config.nat.interfaces.downlink.clone(),
        uplink: config.nat.interfaces.uplink.clone(),
        runtime_dir: config.runtime_dir.clone(),
        iptables: config.iptables.clone(),
        dry_run: config.dry_run,
    }));
    let nat_ap = NatAp::new(config.nat.clone(), platform.clone());

    // Setup shells out and may block for a while.
    let setup = {
        let nat_ap = nat_ap.clone();
        tokio::task::spawn_blocking(move || nat_ap.setup()).await
    };
    match setup {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "gateway setup failed");
            platform.shutdown();
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "setup task panicked");
            platform.shutdown();
            std::process::exit(1);
        }
    }

    let uplink = IfaceHandle::new(platform.options().uplink.as_str());
    let monitor = linux::monitor::spawn(platform.clone(), uplink, config.poll_interval);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => nat_ap.tick(),
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    monitor.abort();
    info!(
        napt_enabled = nat_ap.is_napt_enabled(),
        rules = nat_ap.rules().len(),
        "tearing down"
    );
    platform.shutdown();
    info!("natap-gateway stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
