/**
 * addressing/neighbors.rs
 *
 * OS neighbor cache (ARP / IPv6 neighbor discovery) snapshots
 */

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::process::Command;
use tracing::debug;

use super::errors::EnumerationError;
use super::mac::MacAddress;

/// One row of the neighbor table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub ip: IpAddr,
    pub device: String,
    pub mac: MacAddress,
}

/// Capability to read the neighbor table
///
/// Implementations may block, so call them off the async runtime.
pub trait NeighborTableProvider: Send + Sync {
    fn neighbors(&self) -> Result<Vec<NeighborEntry>, EnumerationError>;
}

/// Fixed table, e.g. handed over by a host application or a test
#[derive(Debug, Clone, Default)]
pub struct StaticNeighborTable(pub Vec<NeighborEntry>);

impl NeighborTableProvider for StaticNeighborTable {
    fn neighbors(&self) -> Result<Vec<NeighborEntry>, EnumerationError> {
        Ok(self.0.clone())
    }
}

/// Runs `ip neigh show` (iproute2), covers IPv4 and IPv6
#[derive(Debug, Clone, Copy, Default)]
pub struct IpNeighborTable;

impl NeighborTableProvider for IpNeighborTable {
    fn neighbors(&self) -> Result<Vec<NeighborEntry>, EnumerationError> {
        let output = Command::new("ip")
            .args(["neigh", "show"])
            .output()
            .map_err(|e| EnumerationError::io("ip neigh show", e))?;

        if !output.status.success() {
            return Err(EnumerationError::CommandFailed {
                what: "ip neigh show",
                status: output.status,
            });
        }

        Ok(parse_ip_neigh(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Reads `/proc/net/arp`, IPv4 only
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcNetArp;

impl NeighborTableProvider for ProcNetArp {
    fn neighbors(&self) -> Result<Vec<NeighborEntry>, EnumerationError> {
        let table = std::fs::read_to_string("/proc/net/arp")
            .map_err(|e| EnumerationError::io("read /proc/net/arp", e))?;
        Ok(parse_proc_net_arp(&table))
    }
}

/// Platform default: `ip neigh` with a `/proc/net/arp` fallback on Linux
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNeighborTable;

impl NeighborTableProvider for SystemNeighborTable {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn neighbors(&self) -> Result<Vec<NeighborEntry>, EnumerationError> {
        match IpNeighborTable.neighbors() {
            Ok(entries) => Ok(entries),
            Err(e) => {
                debug!("{}, falling back to /proc/net/arp", e);
                ProcNetArp.neighbors()
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn neighbors(&self) -> Result<Vec<NeighborEntry>, EnumerationError> {
        Err(EnumerationError::Unsupported("neighbor table query"))
    }
}

/// Parse `ip neigh show` output
///
/// ```text
/// 192.168.1.1 dev wlan0 lladdr aa:bb:cc:dd:ee:ff REACHABLE
/// fe80::1 dev wlan0 lladdr aa:bb:cc:dd:ee:ff router STALE
/// 192.168.1.9 dev wlan0 FAILED
/// ```
///
/// Rows without a link-layer address are skipped.
pub fn parse_ip_neigh(output: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            continue;
        };

        let Ok(ip) = first.parse::<IpAddr>() else {
            debug!("skipping neighbor line: {}", line);
            continue;
        };

        let device = value_after(&tokens, "dev");
        let mac = value_after(&tokens, "lladdr").and_then(MacAddress::parse);

        if let (Some(device), Some(mac)) = (device, mac) {
            entries.push(NeighborEntry {
                ip,
                device: device.to_string(),
                mac,
            });
        }
    }

    entries
}

/// Parse the `/proc/net/arp` table
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        wlan0
/// ```
pub fn parse_proc_net_arp(table: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();

    for line in table.lines().skip(1) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 6 {
            continue;
        }

        // ATF_COM unset means the entry never resolved
        if tokens[2] == "0x0" {
            continue;
        }

        let (Ok(ip), Some(mac)) = (tokens[0].parse::<IpAddr>(), MacAddress::parse(tokens[3]))
        else {
            continue;
        };
        if mac.is_unspecified() {
            continue;
        }

        entries.push(NeighborEntry {
            ip,
            device: tokens[5].to_string(),
            mac,
        });
    }

    entries
}

fn value_after<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    tokens
        .iter()
        .position(|t| *t == key)
        .and_then(|i| tokens.get(i + 1))
        .copied()
}
