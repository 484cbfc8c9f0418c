//! Local network interface enumeration.

use std::net::{IpAddr, Ipv6Addr};

use get_if_addrs::{get_if_addrs, IfAddr};

use crate::error::Result;

/// A non-loopback address assigned to a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub address: IpAddr,
    pub netmask: IpAddr,
}

impl LocalInterface {
    /// Whether `remote` lies on this interface's subnet.
    pub fn contains(&self, remote: IpAddr) -> bool {
        match (self.address, self.netmask, remote) {
            (IpAddr::V4(local), IpAddr::V4(mask), IpAddr::V4(remote)) => {
                let mask = u32::from(mask);
                u32::from(local) & mask == u32::from(remote) & mask
            }
            (IpAddr::V6(local), IpAddr::V6(mask), IpAddr::V6(remote)) => {
                let mask = u128::from(mask);
                u128::from(local) & mask == u128::from(remote) & mask
            }
            _ => false,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }
}

/// Enumerate the non-loopback interface addresses of this host.
pub fn local_interfaces() -> Result<Vec<LocalInterface>> {
    let interfaces = get_if_addrs()?
        .into_iter()
        .filter(|interface| !interface.is_loopback())
        .map(|interface| {
            let (address, netmask) = match interface.addr {
                IfAddr::V4(v4) => (IpAddr::V4(v4.ip), IpAddr::V4(v4.netmask)),
                IfAddr::V6(v6) => (IpAddr::V6(v6.ip), IpAddr::V6(v6.netmask)),
            };
            LocalInterface {
                name: interface.name,
                address,
                netmask,
            }
        })
        .collect();
    Ok(interfaces)
}

/// Pick the local address a datagram from `remote` most likely arrived on.
///
/// Subnet membership wins. Otherwise the first address of the same family is
/// used, preferring link-local IPv6 addresses for link-local senders.
pub fn select_local_address(interfaces: &[LocalInterface], remote: IpAddr) -> Option<IpAddr> {
    if let Some(interface) = interfaces.iter().find(|interface| interface.contains(remote)) {
        return Some(interface.address);
    }
    let same_family = || {
        interfaces
            .iter()
            .filter(move |interface| interface.address.is_ipv4() == remote.is_ipv4())
    };
    if let IpAddr::V6(remote) = remote {
        let wanted = is_unicast_link_local(&remote);
        if let Some(interface) = same_family().find(|interface| match interface.address {
            IpAddr::V6(local) => is_unicast_link_local(&local) == wanted,
            IpAddr::V4(_) => false,
        }) {
            return Some(interface.address);
        }
    }
    same_family().next().map(|interface| interface.address)
}

pub(crate) fn is_unicast_link_local(address: &Ipv6Addr) -> bool {
    address.segments()[0] & 0xffc0 == 0xfe80
}
