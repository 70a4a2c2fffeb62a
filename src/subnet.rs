//! C10: subnet picker. Chooses the local interface that shares a subnet
//! with an already-observed device, so the update/beat sockets bind to the
//! right NIC on a multi-homed host.
//!
//! Grounded on `tasks/membership.rs`'s `NetworkInterface::show()` +
//! `mac_address_by_name` interface enumeration in the teacher crate.

use std::net::Ipv4Addr;

use network_interface::{NetworkInterface, NetworkInterfaceConfig};

use crate::error::{PdjError, Result};

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, prefix_len: u8) -> bool {
    let m = mask(prefix_len);
    (u32::from(a) & m) == (u32::from(b) & m)
}

/// All local interface addresses that share a subnet with `device_addr`,
/// in enumeration order (spec.md §4.10: "return the set of matches").
pub fn find_matching_interfaces(device_addr: Ipv4Addr) -> Result<Vec<(String, Ipv4Addr, u8)>> {
    let interfaces = NetworkInterface::show().map_err(|e| PdjError::Anyhow(anyhow::anyhow!(e)))?;
    let mut matches = Vec::new();

    for iface in interfaces {
        let addr = match iface.addr {
            Some(network_interface::Addr::V4(v4)) => v4,
            _ => continue,
        };
        let prefix_len = addr
            .netmask
            .map(|m| u32::from(m).count_ones() as u8)
            .unwrap_or(32);
        if same_subnet(addr.ip, device_addr, prefix_len) {
            matches.push((iface.name.clone(), addr.ip, prefix_len));
        }
    }

    Ok(matches)
}

/// Resolve the IPv4 address of an interface named explicitly via
/// `Config::interface_name`, bypassing subnet auto-detection (spec.md
/// §4.10: "or skip detection if the caller already knows which interface
/// to use").
pub fn resolve_named_interface(name: &str) -> Result<Ipv4Addr> {
    let interfaces = NetworkInterface::show().map_err(|e| PdjError::Anyhow(anyhow::anyhow!(e)))?;
    interfaces
        .into_iter()
        .find(|iface| iface.name == name)
        .and_then(|iface| match iface.addr {
            Some(network_interface::Addr::V4(v4)) => Some(v4.ip),
            _ => None,
        })
        .ok_or(PdjError::NoMatchingInterface)
}

/// Pick the first interface sharing a subnet with `device_addr`, warning
/// (but not failing) if more than one matches, and failing startup with
/// `NoMatchingInterface` if zero do (spec.md §4.4/§4.10).
pub fn pick_interface(device_addr: Ipv4Addr) -> Result<(String, Ipv4Addr)> {
    let matches = find_matching_interfaces(device_addr)?;
    if matches.is_empty() {
        return Err(PdjError::NoMatchingInterface);
    }
    if matches.len() > 1 {
        log::warn!(
            target: "prolink",
            "{} local interfaces share a subnet with {}; duplicate packets may corrupt state",
            matches.len(),
            device_addr
        );
    }
    let (name, addr, _) = matches.into_iter().next().unwrap();
    Ok((name, addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_computation() {
        assert_eq!(mask(24), 0xffffff00);
        assert_eq!(mask(32), 0xffffffff);
        assert_eq!(mask(0), 0);
    }

    #[test]
    fn same_subnet_matches_slash_24() {
        let a = Ipv4Addr::new(192, 168, 1, 10);
        let b = Ipv4Addr::new(192, 168, 1, 200);
        assert!(same_subnet(a, b, 24));
        let c = Ipv4Addr::new(192, 168, 2, 200);
        assert!(!same_subnet(a, c, 24));
    }
}
