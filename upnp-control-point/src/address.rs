//! Address family policy.
//!
//! Dual-stack hosts announce themselves from several interfaces and address
//! families. [`needs_update`] decides whether a newly received announcement
//! should replace the one on file for the same device.

use std::net::{IpAddr, Ipv6Addr, SocketAddr, UdpSocket};

use upnp_ssdp::SsdpMessage;

/// Address families the control point works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Ipv4Only,
    Ipv6Only,
    #[default]
    DualStack,
}

impl Protocol {
    pub fn allows_ipv4(&self) -> bool {
        !matches!(self, Protocol::Ipv6Only)
    }

    pub fn allows_ipv6(&self) -> bool {
        !matches!(self, Protocol::Ipv4Only)
    }
}

/// Whether `new` should replace `old` as the message on file for a device.
pub fn needs_update(old: &SsdpMessage, new: &SsdpMessage, protocol: Protocol) -> bool {
    address_needs_update(old.local_address, new.local_address, protocol)
}

/// Address preference between the receive addresses of two messages.
///
/// | mode | old | new | update |
/// |---|---|---|---|
/// | IPv4 only | any | IPv4 | yes |
/// | IPv6 only | any | IPv6 | yes |
/// | dual stack | link-local IPv4 | any | yes |
/// | dual stack | other IPv4 | IPv4 | yes |
/// | dual stack | IPv6 | IPv6 | yes |
/// | dual stack | IPv6 | non link-local IPv4 | yes |
///
/// Every other combination keeps the old message. A message without a
/// receive address never replaces one that has an address, and anything
/// replaces a message without one.
pub fn address_needs_update(old: Option<IpAddr>, new: Option<IpAddr>, protocol: Protocol) -> bool {
    let Some(new) = new else {
        return old.is_none();
    };
    let Some(old) = old else {
        return true;
    };
    match protocol {
        Protocol::Ipv4Only => new.is_ipv4(),
        Protocol::Ipv6Only => new.is_ipv6(),
        Protocol::DualStack => match old {
            IpAddr::V4(old) => old.is_link_local() || new.is_ipv4(),
            IpAddr::V6(_) => match new {
                IpAddr::V6(_) => true,
                IpAddr::V4(new) => !new.is_link_local(),
            },
        },
    }
}

/// Local address the operating system would use to reach `remote`.
///
/// No packet is sent; connecting a UDP socket only consults the routing table.
pub fn local_address_for(remote: IpAddr) -> Option<IpAddr> {
    let bind: SocketAddr = match remote {
        IpAddr::V4(_) => "0.0.0.0:0".parse().ok()?,
        IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(SocketAddr::new(remote, 9)).ok()?;
    let local = socket.local_addr().ok()?.ip();
    (!local.is_unspecified()).then_some(local)
}

/// IP literal host of a URL, if it has one.
pub(crate) fn url_host_ip(location: &str) -> Option<IpAddr> {
    let url = url::Url::parse(location).ok()?;
    match url.host()? {
        url::Host::Ipv4(address) => Some(IpAddr::V4(address)),
        url::Host::Ipv6(address) => Some(IpAddr::V6(address)),
        url::Host::Domain(_) => None,
    }
}
