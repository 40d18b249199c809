/**
 * addressing/generator.rs
 *
 * Candidate generation for a contact
 *
 * A contact is configured with MAC addresses and/or literal addresses. MACs
 * are expanded into guesses: our own EUI-64 addresses with the contact's MAC
 * substituted, and whatever the neighbor cache currently maps that MAC to.
 */

use std::net::IpAddr;
use tracing::{debug, warn};

use super::candidate::{is_link_local, is_link_local_v6, CandidateAddress, CandidateSet, CandidateSource};
use super::eui64::{extract_eui64_mac, inject_eui64_mac};
use super::interfaces::{AddressBook, InterfaceSource, NetworkInterface};
use super::mac::MacAddress;
use super::neighbors::{NeighborEntry, NeighborTableProvider, SystemNeighborTable};

/// Placeholder interface some Android builds bring up with a fake EUI-64 address
const DUMMY_INTERFACE: &str = "dummy0";

/// Builds the candidate set for a contact
pub struct CandidateGenerator {
    address_book: AddressBook,
    neighbors: Box<dyn NeighborTableProvider>,
}

impl CandidateGenerator {
    pub fn new(
        interfaces: impl InterfaceSource + 'static,
        neighbors: impl NeighborTableProvider + 'static,
    ) -> Self {
        Self {
            address_book: AddressBook::new(interfaces),
            neighbors: Box::new(neighbors),
        }
    }

    /// Generator backed by the OS interface list and neighbor table
    pub fn system() -> Self {
        Self {
            address_book: AddressBook::system(),
            neighbors: Box::new(SystemNeighborTable),
        }
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    /// Every candidate worth dialing for the given contact
    ///
    /// Blocks on OS queries. A contact address that fails to parse is logged
    /// and skipped; it never aborts the rest of the generation.
    pub fn generate(
        &self,
        contact_addresses: &[String],
        last_working: Option<&CandidateAddress>,
        port: u16,
    ) -> CandidateSet {
        let mut set = CandidateSet::new();

        if let Some(last) = last_working {
            set.insert(last.clone().with_source(CandidateSource::LastWorking));
        }

        // Queried at most once per call, and only if a MAC is configured
        let mut interfaces: Option<Vec<NetworkInterface>> = None;
        let mut neighbors: Option<Vec<NeighborEntry>> = None;

        for address in contact_addresses {
            if let Some(mac) = MacAddress::parse(address.trim()) {
                let interfaces = interfaces.get_or_insert_with(|| self.address_book.interfaces());
                set.extend(eui64_candidates(&mac, interfaces, port));

                let neighbors = neighbors.get_or_insert_with(|| self.neighbor_snapshot());
                set.extend(neighbor_candidates(&mac, neighbors, port));
                continue;
            }

            match CandidateAddress::literal(address, port) {
                Ok(candidate) => {
                    set.insert(candidate);
                }
                Err(e) => warn!("skipping contact address: {}", e),
            }
        }

        for candidate in set.iter() {
            debug!("candidate {} ({})", candidate, candidate.source());
        }

        set
    }

    fn neighbor_snapshot(&self) -> Vec<NeighborEntry> {
        match self.neighbors.neighbors() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("neighbor table query failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Guess the contact's address on every prefix where our own address is
/// EUI-64 derived from our own MAC
fn eui64_candidates(
    contact_mac: &MacAddress,
    interfaces: &[NetworkInterface],
    port: u16,
) -> Vec<CandidateAddress> {
    let mut candidates = Vec::new();

    for nif in interfaces {
        if nif.is_loopback || nif.name == DUMMY_INTERFACE {
            continue;
        }
        let Some(own_mac) = nif.mac else {
            continue;
        };

        for addr in &nif.addresses {
            let IpAddr::V6(template) = addr.ip else {
                continue;
            };
            if template.is_loopback() || extract_eui64_mac(&template) != Some(own_mac) {
                continue;
            }

            let zone = if is_link_local_v6(&template) || addr.scope_id != 0 {
                Some(nif.name.clone())
            } else {
                None
            };

            candidates.push(CandidateAddress::from_ip(
                IpAddr::V6(inject_eui64_mac(&template, contact_mac)),
                zone,
                port,
                CandidateSource::Eui64,
            ));
        }
    }

    candidates
}

/// Addresses the neighbor cache currently associates with the contact's MAC
fn neighbor_candidates(
    contact_mac: &MacAddress,
    neighbors: &[NeighborEntry],
    port: u16,
) -> Vec<CandidateAddress> {
    neighbors
        .iter()
        .filter(|entry| entry.mac == *contact_mac)
        .map(|entry| {
            let zone = is_link_local(&entry.ip).then(|| entry.device.clone());
            CandidateAddress::from_ip(entry.ip, zone, port, CandidateSource::NeighborTable)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::candidate::CandidateHost;
    use crate::addressing::errors::EnumerationError;
    use crate::addressing::interfaces::{InterfaceAddr, StaticInterfaces};
    use crate::addressing::neighbors::StaticNeighborTable;

    const CONTACT_MAC: &str = "aa:bb:cc:dd:ee:ff";
    const PORT: u16 = 10001;

    struct Broken;

    impl InterfaceSource for Broken {
        fn interfaces(&self) -> Result<Vec<NetworkInterface>, EnumerationError> {
            Err(EnumerationError::Unsupported("test"))
        }
    }

    impl NeighborTableProvider for Broken {
        fn neighbors(&self) -> Result<Vec<NeighborEntry>, EnumerationError> {
            Err(EnumerationError::Unsupported("test"))
        }
    }

    fn interface(name: &str, mac: &str, addrs: &[(&str, u32)]) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            mac: Some(mac.parse().unwrap()),
            is_loopback: false,
            addresses: addrs
                .iter()
                .map(|(ip, scope_id)| InterfaceAddr {
                    ip: ip.parse().unwrap(),
                    scope_id: *scope_id,
                })
                .collect(),
        }
    }

    fn neighbor(ip: &str, device: &str, mac: &str) -> NeighborEntry {
        NeighborEntry {
            ip: ip.parse().unwrap(),
            device: device.to_string(),
            mac: mac.parse().unwrap(),
        }
    }

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_eui64_guess_on_link_local_interface() {
        let wlan0 = interface(
            "wlan0",
            "12:34:56:78:9a:bc",
            &[("192.168.1.20", 0), ("fe80::1034:56ff:fe78:9abc", 3)],
        );
        let generator = CandidateGenerator::new(StaticInterfaces(vec![wlan0]), StaticNeighborTable::default());

        let set = generator.generate(&addresses(&[CONTACT_MAC]), None, PORT);
        let candidates = set.into_vec();

        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.ip(), Some("fe80::a8bb:ccff:fedd:eeff".parse().unwrap()));
        assert_eq!(candidate.zone(), Some("wlan0"));
        assert_eq!(candidate.port(), PORT);
        assert_eq!(candidate.source(), CandidateSource::Eui64);
        assert_eq!(candidate.to_string(), "[fe80::a8bb:ccff:fedd:eeff%wlan0]:10001");
    }

    #[test]
    fn test_eui64_global_prefix_has_no_zone() {
        let eth0 = interface("eth0", "12:34:56:78:9a:bc", &[("2001:db8::1034:56ff:fe78:9abc", 0)]);
        let generator = CandidateGenerator::new(StaticInterfaces(vec![eth0]), StaticNeighborTable::default());

        let candidates = generator.generate(&addresses(&[CONTACT_MAC]), None, PORT).into_vec();
        assert_eq!(candidates[0].ip(), Some("2001:db8::a8bb:ccff:fedd:eeff".parse().unwrap()));
        assert_eq!(candidates[0].zone(), None);
    }

    #[test]
    fn test_eui64_skips_foreign_privacy_and_dummy_addresses() {
        let interfaces = vec![
            // address does not embed this interface's MAC
            interface("wlan0", "00:00:00:00:00:01", &[("fe80::1034:56ff:fe78:9abc", 3)]),
            // privacy address, no FFFE
            interface("wlan1", "12:34:56:78:9a:bc", &[("fe80::1234:5678:9abc:def0", 4)]),
            interface("dummy0", "12:34:56:78:9a:bc", &[("fe80::1034:56ff:fe78:9abc", 5)]),
            NetworkInterface {
                is_loopback: true,
                ..interface("lo", "12:34:56:78:9a:bc", &[("fe80::1034:56ff:fe78:9abc", 1)])
            },
        ];
        let generator = CandidateGenerator::new(StaticInterfaces(interfaces), StaticNeighborTable::default());
        assert!(generator.generate(&addresses(&[CONTACT_MAC]), None, PORT).is_empty());
    }

    #[test]
    fn test_neighbor_table_matches_and_zones() {
        let table = StaticNeighborTable(vec![
            neighbor("192.168.1.7", "wlan0", CONTACT_MAC),
            neighbor("169.254.9.9", "eth0", CONTACT_MAC),
            neighbor("fe80::77", "wlan0", CONTACT_MAC),
            neighbor("192.168.1.8", "wlan0", "00:11:22:33:44:55"),
        ]);
        let generator = CandidateGenerator::new(StaticInterfaces::default(), table);

        let candidates = generator.generate(&addresses(&[CONTACT_MAC]), None, PORT).into_vec();
        let rendered: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "192.168.1.7:10001",
                "169.254.9.9%eth0:10001",
                "[fe80::77%wlan0]:10001",
            ]
        );
        assert!(candidates.iter().all(|c| c.source() == CandidateSource::NeighborTable));
    }

    #[test]
    fn test_literal_survives_enumeration_failure() {
        let generator = CandidateGenerator::new(Broken, Broken);
        let set = generator.generate(&addresses(&[CONTACT_MAC, "192.168.1.50"]), None, PORT);

        let literal = CandidateAddress::literal("192.168.1.50", PORT).unwrap();
        assert!(set.contains(&literal));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_duplicates_across_sources_collapse() {
        let table = StaticNeighborTable(vec![neighbor("192.168.1.7", "wlan0", CONTACT_MAC)]);
        let generator = CandidateGenerator::new(StaticInterfaces::default(), table);

        let set = generator.generate(&addresses(&["192.168.1.7", CONTACT_MAC, "192.168.1.7"]), None, PORT);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let generator = CandidateGenerator::new(StaticInterfaces::default(), StaticNeighborTable::default());
        let set = generator.generate(&addresses(&["not valid!", "", "phone.lan"]), None, PORT);

        let candidates = set.into_vec();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].host(), &CandidateHost::Name("phone.lan".to_string()));
    }

    #[test]
    fn test_last_working_always_included() {
        let generator = CandidateGenerator::new(Broken, Broken);
        let last: CandidateAddress = "[2001:db8::9]:10001".parse().unwrap();

        let set = generator.generate(&[], Some(&last), PORT);
        let candidates = set.into_vec();
        assert_eq!(candidates, vec![last]);
        assert_eq!(candidates[0].source(), CandidateSource::LastWorking);
    }
}
