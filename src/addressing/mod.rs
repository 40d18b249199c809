/**
 * addressing/mod.rs
 *
 * Address discovery for contacts without a rendezvous server:
 * - own interface / MAC enumeration
 * - EUI-64 address algebra
 * - neighbor table lookups
 * - candidate generation and ranking
 */

mod candidate;
mod errors;
mod eui64;
mod generator;
mod interfaces;
mod mac;
mod neighbors;
mod ranking;

pub use candidate::{is_link_local, CandidateAddress, CandidateHost, CandidateSet, CandidateSource};
pub use errors::{AddressParseError, EnumerationError};
pub use eui64::{extract_eui64_mac, inject_eui64_mac};
pub use generator::CandidateGenerator;
pub use interfaces::{
    AddressBook, AddressEntry, InterfaceAddr, InterfaceSource, NetworkInterface, StaticInterfaces,
    SystemInterfaces,
};
pub use mac::MacAddress;
pub use neighbors::{
    parse_ip_neigh, parse_proc_net_arp, IpNeighborTable, NeighborEntry, NeighborTableProvider,
    ProcNetArp, StaticNeighborTable, SystemNeighborTable,
};
pub use ranking::{rank, tier};

/// Generate and rank in one go. Blocks on OS queries.
pub fn ranked_candidates(
    generator: &CandidateGenerator,
    contact_addresses: &[String],
    last_working: Option<&CandidateAddress>,
    port: u16,
) -> Vec<CandidateAddress> {
    let set = generator.generate(contact_addresses, last_working, port);
    rank(set, last_working)
}
