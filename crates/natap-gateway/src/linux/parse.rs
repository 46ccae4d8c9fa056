//! Parsers for `ip` output, `resolv.conf` and the generated daemon configs.

use natap_core::platform::ApSettings;
use std::net::Ipv4Addr;
use std::path::Path;

/// First IPv4 address and prefix length in `ip -4 -o addr show dev X` output.
///
/// ```text
/// 3: wlan0    inet 10.0.0.5/24 brd 10.0.0.255 scope global dynamic wlan0\       valid_lft 86371sec
/// ```
pub fn parse_ip_addr_output(output: &str) -> Option<(Ipv4Addr, u8)> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        fields.find(|f| *f == "inet")?;
        let cidr = fields.next()?;
        let (addr, prefix) = cidr.split_once('/')?;
        let prefix: u8 = prefix.parse().ok().filter(|p| *p <= 32)?;
        Some((addr.parse().ok()?, prefix))
    })
}

/// Gateway from `ip -4 route show default dev X` output
/// (`default via 10.0.0.1 proto dhcp metric 600`).
pub fn parse_default_route(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.next()? != "default" {
            return None;
        }
        fields.find(|f| *f == "via")?;
        fields.next()?.parse().ok()
    })
}

/// First usable IPv4 `nameserver` entry in a resolv.conf document. Loopback
/// stubs (systemd-resolved's `127.0.0.53`) are skipped: clients on the
/// downlink cannot reach them.
pub fn parse_resolv_conf(text: &str) -> Option<Ipv4Addr> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#') && !l.starts_with(';'))
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            if fields.next()? != "nameserver" {
                return None;
            }
            fields
                .next()?
                .parse::<Ipv4Addr>()
                .ok()
                .filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
        })
}

/// First usable nameserver across `paths`, in order. Missing files are skipped.
pub fn first_nameserver(paths: &[&Path]) -> Option<Ipv4Addr> {
    paths.iter().find_map(|path| {
        let text = std::fs::read_to_string(path).ok()?;
        parse_resolv_conf(&text)
    })
}

pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    match prefix {
        0 => Ipv4Addr::UNSPECIFIED,
        p => Ipv4Addr::from(u32::MAX << (32 - u32::from(p.min(32)))),
    }
}

pub fn netmask_to_prefix(netmask: Ipv4Addr) -> u8 {
    u32::from(netmask).leading_ones() as u8
}

/// Network address of `ip` under `netmask`.
pub fn network_of(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & u32::from(netmask))
}

/// hostapd configuration for the access point on `iface`.
pub fn render_hostapd_conf(iface: &str, settings: &ApSettings) -> String {
    let mut conf = format!(
        "interface={iface}\n\
         driver=nl80211\n\
         ssid={ssid}\n\
         hw_mode=g\n\
         channel={channel}\n\
         beacon_int={beacon}\n\
         max_num_sta={max}\n\
         ignore_broadcast_ssid={hidden}\n",
        ssid = settings.ssid,
        channel = settings.channel,
        beacon = settings.beacon_interval_ms,
        max = settings.max_connections,
        hidden = u8::from(settings.hidden),
    );
    if settings.password.is_empty() {
        conf.push_str("auth_algs=1\n");
    } else {
        // WPA/WPA2-PSK, management frame protection offered but optional.
        conf.push_str(&format!(
            "auth_algs=1\n\
             wpa=3\n\
             wpa_key_mgmt=WPA-PSK\n\
             wpa_pairwise=TKIP CCMP\n\
             rsn_pairwise=CCMP\n\
             ieee80211w=1\n\
             wpa_passphrase={}\n",
            settings.password
        ));
    }
    conf
}

/// dnsmasq arguments serving DHCP on `iface` for the /24 of `ap`.
pub fn dnsmasq_args(iface: &str, ap: Ipv4Addr, dns: Option<Ipv4Addr>) -> Vec<String> {
    let [a, b, c, _] = ap.octets();
    let mut args = vec![
        "--keep-in-foreground".to_string(),
        "--port=0".to_string(),
        format!("--interface={iface}"),
        "--bind-interfaces".to_string(),
        format!("--dhcp-range={a}.{b}.{c}.10,{a}.{b}.{c}.100,255.255.255.0,12h"),
        format!("--dhcp-option=3,{ap}"),
    ];
    if let Some(dns) = dns {
        args.push(format!("--dhcp-option=6,{dns}"));
    }
    args
}
