/**
 * addressing/ranking.rs
 *
 * Dial order for a candidate set
 */

use std::net::IpAddr;

use super::candidate::{CandidateAddress, CandidateHost, CandidateSet};

const TIER_LAST_WORKING: u8 = 100;
const TIER_IPV6_UNSPECIFIED: u8 = 50;
const TIER_IPV6: u8 = 30;
const TIER_IPV4: u8 = 20;
const TIER_OTHER: u8 = 0;

/// Priority tier of a single candidate
///
/// The address that worked last time beats everything, then IPv6, then
/// IPv4, then unresolved names.
pub fn tier(candidate: &CandidateAddress, last_working: Option<&CandidateAddress>) -> u8 {
    if last_working == Some(candidate) {
        return TIER_LAST_WORKING;
    }

    match candidate.host() {
        CandidateHost::Ip(IpAddr::V6(ip)) if ip.is_unspecified() => TIER_IPV6_UNSPECIFIED,
        CandidateHost::Ip(IpAddr::V6(_)) => TIER_IPV6,
        CandidateHost::Ip(IpAddr::V4(_)) => TIER_IPV4,
        CandidateHost::Name(_) => TIER_OTHER,
    }
}

/// Order candidates best first
///
/// Within a tier, candidates are ordered by source weight and then by their
/// position in the set, so the result is deterministic for a given input.
pub fn rank(candidates: CandidateSet, last_working: Option<&CandidateAddress>) -> Vec<CandidateAddress> {
    let mut ranked = candidates.into_vec();
    ranked.sort_by_key(|c| {
        std::cmp::Reverse((tier(c, last_working), c.source().weight()))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::candidate::CandidateSource;

    fn literal(s: &str) -> CandidateAddress {
        CandidateAddress::literal(s, 10001).unwrap()
    }

    #[test]
    fn test_tiers() {
        assert_eq!(tier(&literal("::"), None), 50);
        assert_eq!(tier(&literal("2001:db8::1"), None), 30);
        assert_eq!(tier(&literal("fe80::1%wlan0"), None), 30);
        assert_eq!(tier(&literal("10.0.0.1"), None), 20);
        assert_eq!(tier(&literal("phone.lan"), None), 0);

        let last = literal("10.0.0.1");
        assert_eq!(tier(&literal("10.0.0.1"), Some(&last)), 100);
        assert_eq!(tier(&literal("10.0.0.2"), Some(&last)), 20);
    }

    #[test]
    fn test_rank_orders_by_tier() {
        let a = literal("10.0.0.1");
        let b = literal("2001:db8::1");
        let c = literal("10.0.0.9");

        let set: CandidateSet = vec![a.clone(), b.clone(), c.clone()].into_iter().collect();
        let ranked = rank(set, Some(&c));

        assert_eq!(ranked, vec![c, b, a]);
    }

    #[test]
    fn test_rank_full_policy() {
        let set: CandidateSet = vec![
            literal("phone.lan"),
            literal("192.168.1.2"),
            literal("fe80::1%wlan0"),
            literal("::"),
            literal("2001:db8::2"),
        ]
        .into_iter()
        .collect();
        let last = literal("2001:db8::2");

        let ranked: Vec<String> = rank(set, Some(&last)).iter().map(|c| c.to_string()).collect();
        assert_eq!(
            ranked,
            vec![
                "[2001:db8::2]:10001",
                "[::]:10001",
                "[fe80::1%wlan0]:10001",
                "192.168.1.2:10001",
                "phone.lan:10001",
            ]
        );
    }

    #[test]
    fn test_rank_source_breaks_ties() {
        let literal_v4 = literal("192.168.1.2");
        let neighbor_v4 = literal("192.168.1.3").with_source(CandidateSource::NeighborTable);

        let set: CandidateSet = vec![literal_v4.clone(), neighbor_v4.clone()].into_iter().collect();
        let ranked = rank(set, None);
        assert_eq!(ranked, vec![neighbor_v4, literal_v4]);
    }

    #[test]
    fn test_rank_empty() {
        assert!(rank(CandidateSet::new(), None).is_empty());
    }
}
