use std::net::IpAddr;

use crate::{
    error::InstallerError,
    host::Host,
    model::{IpAddress, NetworkSnapshot},
    probe::{self, Family},
    ui,
};

/// Replaces any loopback resolver; a stub resolver from the running system
/// will not exist in the new one.
pub const FALLBACK_NAMESERVER: &str = "8.8.8.8";

/// Captures addressing, routes and resolvers of the primary interface.
///
/// The primary interface is simply the first non-loopback link the kernel
/// lists; hosts with several NICs are not disambiguated.
pub fn capture(host: &dyn Host) -> Result<NetworkSnapshot, InstallerError> {
    let link = probe::links(host)?
        .into_iter()
        .find(|l| !l.is_loopback())
        .ok_or_else(|| InstallerError::ProbeFailure("no non-loopback network interface".to_string()))?;
    let iface = link.ifname;

    let mut ipv4_addresses = Vec::new();
    let mut ipv6_addresses = Vec::new();
    for addr in probe::addresses(host, &iface)? {
        let entry = IpAddress {
            address: addr.local,
            prefix_length: addr.prefix_len,
        };
        match addr.family {
            Family::V4 => ipv4_addresses.push(entry),
            Family::V6 => ipv6_addresses.push(entry),
        }
    }

    let snapshot = NetworkSnapshot {
        uses_predictable_naming: uses_predictable_naming(&iface),
        gateway4: probe::default_gateway(host, Family::V4, &iface),
        gateway6: probe::default_gateway(host, Family::V6, &iface),
        nameservers: sanitize_nameservers(probe::nameservers(host)),
        mac_address: link.address.filter(|mac| !mac.is_empty()),
        primary_interface_name: iface,
        ipv4_addresses,
        ipv6_addresses,
    };
    log::info!("Network snapshot: {:?}", snapshot);

    if snapshot.ipv4_addresses.is_empty() && snapshot.ipv6_addresses.is_empty() {
        ui::print_warning(&format!(
            "{} has no addresses — the new system will come up without network.",
            snapshot.primary_interface_name
        ));
    }
    let addrs = snapshot
        .ipv4_addresses
        .iter()
        .chain(&snapshot.ipv6_addresses)
        .map(|a| format!("{}/{}", a.address, a.prefix_length))
        .collect::<Vec<_>>()
        .join(" ");
    let dns = snapshot.nameservers.join(" ");
    ui::print_kv_box(
        "Network",
        &[
            ("Interface", snapshot.primary_interface_name.as_str()),
            ("Addresses", addrs.as_str()),
            ("Gateway", snapshot.gateway4.as_deref().unwrap_or("—")),
            ("Gateway6", snapshot.gateway6.as_deref().unwrap_or("—")),
            ("DNS", dns.as_str()),
        ],
    );

    Ok(snapshot)
}

/// `eth0`-style names come from the legacy kernel scheme; everything else
/// (`enp1s0`, `ens3`, ...) is treated as predictable naming.
pub fn uses_predictable_naming(iface: &str) -> bool {
    !iface.starts_with("eth")
}

/// Swaps every loopback resolver for the fallback, keeping order and count.
pub fn sanitize_nameservers(nameservers: Vec<String>) -> Vec<String> {
    nameservers
        .into_iter()
        .map(|ns| {
            if is_loopback(&ns) {
                log::info!("Replacing loopback nameserver {} with {}", ns, FALLBACK_NAMESERVER);
                FALLBACK_NAMESERVER.to_string()
            } else {
                ns
            }
        })
        .collect()
}

fn is_loopback(ns: &str) -> bool {
    match ns.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
        Ok(ip) => ip.is_loopback(),
        Err(_) => false,
    }
}
