/**
 * addressing/interfaces.rs
 *
 * Local network interface enumeration
 */

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, warn};

use super::errors::EnumerationError;
use super::mac::MacAddress;

/// One local IP or MAC bound to one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    pub device: String,
    pub multicast: bool,
}

/// An address configured on an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddr {
    pub ip: IpAddr,
    /// IPv6 scope id (0 when not scoped, always 0 for IPv4)
    #[serde(default)]
    pub scope_id: u32,
}

/// Snapshot of a single network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: Option<MacAddress>,
    #[serde(default)]
    pub is_loopback: bool,
    #[serde(default)]
    pub addresses: Vec<InterfaceAddr>,
}

/// Source of interface snapshots
///
/// Implementations may block (they talk to the OS), so callers on an async
/// runtime should use `spawn_blocking`.
pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>, EnumerationError>;
}

/// Fixed interface list, e.g. handed over by a host application or a test
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<NetworkInterface>);

impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>, EnumerationError> {
        Ok(self.0.clone())
    }
}

/// Interfaces as reported by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>, EnumerationError> {
        system::interfaces()
    }
}

/// Read-only view over the host's own addresses
pub struct AddressBook {
    source: Box<dyn InterfaceSource>,
}

impl AddressBook {
    pub fn new(source: impl InterfaceSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn system() -> Self {
        Self::new(SystemInterfaces)
    }

    /// Current interface snapshot. Enumeration failures yield an empty list.
    pub fn interfaces(&self) -> Vec<NetworkInterface> {
        match self.source.interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("interface enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Every MAC and IP of every non-loopback interface
    pub fn list_own_addresses(&self) -> Vec<AddressEntry> {
        let mut entries = Vec::new();

        for nif in self.interfaces() {
            if nif.is_loopback {
                continue;
            }

            if let Some(mac) = nif.mac {
                entries.push(AddressEntry {
                    address: mac.to_string(),
                    device: nif.name.clone(),
                    multicast: mac.is_multicast() || mac.is_locally_administered(),
                });
            }

            for addr in &nif.addresses {
                if addr.ip.is_loopback() {
                    continue;
                }
                entries.push(AddressEntry {
                    address: addr.ip.to_string(),
                    device: nif.name.clone(),
                    multicast: addr.ip.is_multicast(),
                });
            }
        }

        for entry in &entries {
            debug!(
                "own address: {} ({}{})",
                entry.address,
                entry.device,
                if entry.multicast { ", multicast" } else { "" }
            );
        }

        entries
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(unix)]
mod system {
    use std::collections::BTreeMap;
    use std::ffi::CStr;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use super::{InterfaceAddr, NetworkInterface};
    use crate::addressing::errors::EnumerationError;
    use crate::addressing::mac::MacAddress;

    /// Walk `getifaddrs` and group the entries by interface name
    pub(super) fn interfaces() -> Result<Vec<NetworkInterface>, EnumerationError> {
        let mut by_name: BTreeMap<String, NetworkInterface> = BTreeMap::new();

        unsafe {
            let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
            if libc::getifaddrs(&mut ifaddrs) != 0 {
                return Err(EnumerationError::io(
                    "getifaddrs",
                    std::io::Error::last_os_error(),
                ));
            }

            let mut current = ifaddrs;
            while !current.is_null() {
                let ifa = &*current;
                current = ifa.ifa_next;

                if ifa.ifa_name.is_null() {
                    continue;
                }
                let name = match CStr::from_ptr(ifa.ifa_name).to_str() {
                    Ok(s) => s.to_string(),
                    Err(_) => continue,
                };

                let nif = by_name
                    .entry(name.clone())
                    .or_insert_with(|| NetworkInterface {
                        name,
                        mac: None,
                        is_loopback: false,
                        addresses: Vec::new(),
                    });

                if ifa.ifa_flags & (libc::IFF_LOOPBACK as libc::c_uint) != 0 {
                    nif.is_loopback = true;
                }

                if ifa.ifa_addr.is_null() {
                    continue;
                }

                let family = (*ifa.ifa_addr).sa_family as libc::c_int;
                match family {
                    libc::AF_INET => {
                        let sin = ifa.ifa_addr as *const libc::sockaddr_in;
                        let ip = Ipv4Addr::from((*sin).sin_addr.s_addr.to_ne_bytes());
                        nif.addresses.push(InterfaceAddr {
                            ip: IpAddr::V4(ip),
                            scope_id: 0,
                        });
                    }
                    libc::AF_INET6 => {
                        let sin6 = ifa.ifa_addr as *const libc::sockaddr_in6;
                        let ip = Ipv6Addr::from((*sin6).sin6_addr.s6_addr);
                        nif.addresses.push(InterfaceAddr {
                            ip: IpAddr::V6(ip),
                            scope_id: (*sin6).sin6_scope_id,
                        });
                    }
                    _ => {
                        if let Some(mac) = link_layer_address(ifa.ifa_addr) {
                            nif.mac = Some(mac);
                        }
                    }
                }
            }

            libc::freeifaddrs(ifaddrs);
        }

        Ok(by_name.into_values().collect())
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe fn link_layer_address(sa: *const libc::sockaddr) -> Option<MacAddress> {
        if (*sa).sa_family as libc::c_int != libc::AF_PACKET {
            return None;
        }
        let sll = sa as *const libc::sockaddr_ll;
        let addr: &[u8; 8] = &(*sll).sll_addr;
        let len = ((*sll).sll_halen as usize).min(addr.len());
        MacAddress::from_slice(&addr[..len])
    }

    #[cfg(target_vendor = "apple")]
    unsafe fn link_layer_address(sa: *const libc::sockaddr) -> Option<MacAddress> {
        if (*sa).sa_family as libc::c_int != libc::AF_LINK {
            return None;
        }
        let sdl = sa as *const libc::sockaddr_dl;
        // LLADDR(): the link address follows the interface name inside sdl_data
        let data = std::ptr::addr_of!((*sdl).sdl_data) as *const u8;
        let bytes = std::slice::from_raw_parts(
            data.add((*sdl).sdl_nlen as usize),
            (*sdl).sdl_alen as usize,
        );
        MacAddress::from_slice(bytes)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
    unsafe fn link_layer_address(_sa: *const libc::sockaddr) -> Option<MacAddress> {
        None
    }
}

#[cfg(not(unix))]
mod system {
    use super::NetworkInterface;
    use crate::addressing::errors::EnumerationError;

    pub(super) fn interfaces() -> Result<Vec<NetworkInterface>, EnumerationError> {
        Err(EnumerationError::Unsupported("interface enumeration"))
    }
}
