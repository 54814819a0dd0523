//! Network interface table: snapshot of host interfaces used to classify a socket
//! endpoint as local or remote (SPEC_FULL.md §3, §4.10).
//!
//! Grounded on `nix::ifaddrs`, already a teacher dependency, used here the way the
//! teacher uses other `nix` modules elsewhere for direct OS introspection rather than
//! shelling out or hand-parsing `/proc`.

use nix::ifaddrs::getifaddrs;
use nix::sys::socket::SockAddr;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum IfaceAddr {
    V4 {
        addr: Ipv4Addr,
        netmask: Ipv4Addr,
    },
    V6 {
        addr: Ipv6Addr,
        netmask: Ipv6Addr,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub addr: IfaceAddr,
}

/// Immutable after import, per the data model. Built once at open time by
/// [`crate::snapshot`] and handed to the parser for endpoint classification. Embedded in
/// a trace file's header (`crate::source::TraceHeader`) so file replay classifies
/// local/remote endpoints the same way a live capture on the recording host would.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkInterfaceTable {
    interfaces: Vec<Interface>,
}

impl NetworkInterfaceTable {
    pub fn empty() -> Self {
        NetworkInterfaceTable {
            interfaces: Vec::new(),
        }
    }

    /// Enumerates host interfaces via `getifaddrs`. Interfaces the kernel reports without
    /// a usable (`AF_INET`/`AF_INET6`) address — e.g. a purely link-layer entry — are
    /// skipped; they carry nothing the parser's local/remote classification needs.
    pub fn import() -> Self {
        let mut interfaces = Vec::new();
        match getifaddrs() {
            Ok(addrs) => {
                for ifaddr in addrs {
                    let (address, netmask) = match (ifaddr.address, ifaddr.netmask) {
                        (Some(a), Some(m)) => (a, m),
                        _ => continue,
                    };
                    if let (SockAddr::Inet(a), SockAddr::Inet(m)) = (address, netmask) {
                        match (a.to_std().ip(), m.to_std().ip()) {
                            (std::net::IpAddr::V4(addr), std::net::IpAddr::V4(netmask)) => {
                                interfaces.push(Interface {
                                    name: ifaddr.interface_name,
                                    addr: IfaceAddr::V4 { addr, netmask },
                                });
                            }
                            (std::net::IpAddr::V6(addr), std::net::IpAddr::V6(netmask)) => {
                                interfaces.push(Interface {
                                    name: ifaddr.interface_name,
                                    addr: IfaceAddr::V6 { addr, netmask },
                                });
                            }
                            _ => {}
                        }
                    }
                }
            }
            Err(e) => {
                log!(
                    LogWarn,
                    "getifaddrs failed, network interface table will be empty: {}",
                    e
                );
            }
        }
        NetworkInterfaceTable { interfaces }
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn is_local_v4(&self, addr: Ipv4Addr) -> bool {
        if addr.is_loopback() {
            return true;
        }
        self.interfaces.iter().any(|i| match i.addr {
            IfaceAddr::V4 { addr: a, .. } => a == addr,
            _ => false,
        })
    }

    pub fn is_local_v6(&self, addr: Ipv6Addr) -> bool {
        if addr.is_loopback() {
            return true;
        }
        self.interfaces.iter().any(|i| match i.addr {
            IfaceAddr::V6 { addr: a, .. } => a == addr,
            _ => false,
        })
    }

    /// Classifies a socket endpoint as remote (not one of the host's own addresses).
    /// Unix-domain endpoints are never remote. Used by the parser's live `connect`/`bind`
    /// handling and by the snapshot import's `fix_sockets_coming_from_proc` fix-up pass.
    pub fn is_remote_endpoint(&self, ep: &crate::event::SockEndpoint) -> bool {
        use crate::event::SockEndpoint;
        match ep {
            SockEndpoint::Ipv4 { addr, .. } => {
                !self.is_local_v4(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]))
            }
            SockEndpoint::Ipv6 { addr, .. } => !self.is_local_v6(Ipv6Addr::from(*addr)),
            SockEndpoint::Unix { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_always_local() {
        let table = NetworkInterfaceTable::empty();
        assert!(table.is_local_v4(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(table.is_local_v6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn unknown_address_is_not_local_on_empty_table() {
        let table = NetworkInterfaceTable::empty();
        assert!(!table.is_local_v4(Ipv4Addr::new(203, 0, 113, 5)));
    }

    #[test]
    fn imported_interface_is_recognized_as_local() {
        let table = NetworkInterfaceTable {
            interfaces: vec![Interface {
                name: "eth0".to_string(),
                addr: IfaceAddr::V4 {
                    addr: Ipv4Addr::new(10, 0, 0, 5),
                    netmask: Ipv4Addr::new(255, 255, 255, 0),
                },
            }],
        };
        assert!(table.is_local_v4(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!table.is_local_v4(Ipv4Addr::new(10, 0, 0, 6)));
    }
}
