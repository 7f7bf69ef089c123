//! Host-local address set
//!
//! Computed once at startup from the host's interfaces. Direction of a
//! packet is decided by its source: a packet whose source address belongs to
//! this host is outbound, anything else is inbound. Zone validation and
//! default-policy selection both go through [`LocalAddrs::direction_of`].

use hostwall_common::{Direction, HostwallResult, PacketRecord};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Addresses assigned to this host, stored in canonical textual form
#[derive(Debug, Clone, Default)]
pub struct LocalAddrs {
    addrs: HashSet<String>,
}

impl LocalAddrs {
    /// Empty set (every packet is inbound)
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate the host's interface addresses
    pub fn discover() -> HostwallResult<Self> {
        let found = interface_addrs()?;
        tracing::debug!(count = found.len(), "discovered local addresses");
        Ok(found.into_iter().collect())
    }

    /// Add an address. Returns false if `addr` is not an IP address.
    pub fn insert(&mut self, addr: &str) -> bool {
        match addr.trim().parse::<IpAddr>() {
            Ok(ip) => {
                self.addrs.insert(ip.to_string());
                true
            }
            Err(_) => false,
        }
    }

    /// Membership test on the textual form produced by the packet parser
    #[inline]
    pub fn contains(&self, addr: &str) -> bool {
        self.addrs.contains(addr)
    }

    /// Orientation of a packet whose source is `src_ip`
    #[inline]
    pub fn direction_of(&self, src_ip: &str) -> Direction {
        if self.contains(src_ip) {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }

    /// Orientation of a packet
    #[inline]
    pub fn direction(&self, pkt: &PacketRecord) -> Direction {
        self.direction_of(&pkt.src_ip)
    }

    /// Number of addresses
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

impl FromIterator<IpAddr> for LocalAddrs {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        Self {
            addrs: iter.into_iter().map(|ip| ip.to_string()).collect(),
        }
    }
}

impl Extend<IpAddr> for LocalAddrs {
    fn extend<T: IntoIterator<Item = IpAddr>>(&mut self, iter: T) {
        self.addrs.extend(iter.into_iter().map(|ip| ip.to_string()));
    }
}

#[cfg(unix)]
fn interface_addrs() -> HostwallResult<Vec<IpAddr>> {
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success getifaddrs hands us a list we own until freeifaddrs.
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let mut addrs = Vec::new();
    let mut cur = ifap;
    while !cur.is_null() {
        // SAFETY: cur is a live node of the list returned above.
        let ifa = unsafe { &*cur };
        if !ifa.ifa_addr.is_null() {
            // SAFETY: ifa_addr is non-null and the family tag says which
            // sockaddr layout it points at.
            let family = unsafe { (*ifa.ifa_addr).sa_family } as libc::c_int;
            match family {
                libc::AF_INET => {
                    // SAFETY: AF_INET entries point at a sockaddr_in owned by the list.
                    let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                    addrs.push(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))));
                }
                libc::AF_INET6 => {
                    // SAFETY: AF_INET6 entries point at a sockaddr_in6 owned by the list.
                    let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
                    addrs.push(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)));
                }
                _ => {}
            }
        }
        cur = ifa.ifa_next;
    }

    // SAFETY: ifap came from getifaddrs and is released exactly once.
    unsafe { libc::freeifaddrs(ifap) };
    Ok(addrs)
}

#[cfg(not(unix))]
fn interface_addrs() -> HostwallResult<Vec<IpAddr>> {
    Ok(Vec::new())
}
