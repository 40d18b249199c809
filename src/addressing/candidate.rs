/**
 * addressing/candidate.rs
 *
 * Socket address candidates for reaching a contact
 */

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::str::FromStr;

use super::errors::AddressParseError;

/// Host part of a candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CandidateHost {
    Ip(IpAddr),
    /// Hostname, resolved when dialing
    Name(String),
}

/// Where a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    LastWorking,
    Literal,
    Eui64,
    NeighborTable,
}

impl CandidateSource {
    /// Tie-break weight between candidates of the same ranking tier
    pub fn weight(&self) -> u8 {
        match self {
            CandidateSource::NeighborTable => 3,
            CandidateSource::Eui64 => 2,
            CandidateSource::Literal => 1,
            CandidateSource::LastWorking => 0,
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateSource::LastWorking => write!(f, "last-working"),
            CandidateSource::Literal => write!(f, "literal"),
            CandidateSource::Eui64 => write!(f, "eui64"),
            CandidateSource::NeighborTable => write!(f, "neighbor"),
        }
    }
}

/// A host, optional zone and port to try
///
/// Two candidates are the same when host, zone and port match; the source is
/// bookkeeping only.
#[derive(Debug, Clone)]
pub struct CandidateAddress {
    host: CandidateHost,
    zone: Option<String>,
    port: u16,
    source: CandidateSource,
}

impl CandidateAddress {
    pub fn new(host: CandidateHost, zone: Option<String>, port: u16, source: CandidateSource) -> Self {
        Self {
            host,
            zone,
            port,
            source,
        }
    }

    pub fn from_ip(ip: IpAddr, zone: Option<String>, port: u16, source: CandidateSource) -> Self {
        Self::new(CandidateHost::Ip(ip), zone, port, source)
    }

    /// Parse a contact address literal (`192.168.1.5`, `fe80::1%wlan0`,
    /// `[2001:db8::1]`, `phone.lan`) and attach `port`
    pub fn literal(address: &str, port: u16) -> Result<Self, AddressParseError> {
        let (host, zone) = parse_host(address.trim())?;
        Ok(Self::new(host, zone, port, CandidateSource::Literal))
    }

    pub fn with_source(mut self, source: CandidateSource) -> Self {
        self.source = source;
        self
    }

    pub fn host(&self) -> &CandidateHost {
        &self.host
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match &self.host {
            CandidateHost::Ip(ip) => Some(*ip),
            CandidateHost::Name(_) => None,
        }
    }

    /// Resolve to concrete socket addresses
    ///
    /// IPv6 zones are mapped to a scope id (numeric zone or interface name).
    /// Zones on IPv4 addresses carry no meaning for `connect` and are ignored.
    pub async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        match &self.host {
            CandidateHost::Ip(IpAddr::V6(ip)) => {
                let scope_id = match &self.zone {
                    Some(zone) => scope_index(zone)?,
                    None => 0,
                };
                Ok(vec![SocketAddr::V6(SocketAddrV6::new(*ip, self.port, 0, scope_id))])
            }
            CandidateHost::Ip(ip) => Ok(vec![SocketAddr::new(*ip, self.port)]),
            CandidateHost::Name(name) => {
                let addrs: Vec<SocketAddr> =
                    tokio::net::lookup_host((name.as_str(), self.port)).await?.collect();
                if addrs.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} did not resolve", name),
                    ));
                }
                Ok(addrs)
            }
        }
    }
}

impl PartialEq for CandidateAddress {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.zone == other.zone && self.port == other.port
    }
}

impl Eq for CandidateAddress {}

impl Hash for CandidateAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.zone.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for CandidateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let zone = self.zone.as_deref().map(|z| format!("%{}", z)).unwrap_or_default();
        match &self.host {
            CandidateHost::Ip(IpAddr::V6(ip)) => write!(f, "[{}{}]:{}", ip, zone, self.port),
            CandidateHost::Ip(IpAddr::V4(ip)) => write!(f, "{}{}:{}", ip, zone, self.port),
            CandidateHost::Name(name) => write!(f, "{}:{}", name, self.port),
        }
    }
}

/// Parses the `Display` form, e.g. a persisted last-working address
impl FromStr for CandidateAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            rest.split_once("]:")
                .ok_or_else(|| AddressParseError::InvalidPort(s.to_string()))?
        } else {
            let (host, port) = s
                .rsplit_once(':')
                .ok_or_else(|| AddressParseError::InvalidPort(s.to_string()))?;
            if host.contains(':') {
                // unbracketed IPv6
                return Err(AddressParseError::InvalidAddress(s.to_string()));
            }
            (host, port)
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
        let (host, zone) = parse_host(host)?;

        Ok(Self::new(host, zone, port, CandidateSource::LastWorking))
    }
}

/// Ordered collection of distinct candidates
///
/// Keeps the first occurrence when the same address is inserted twice.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<CandidateAddress>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an identical candidate is already present
    pub fn insert(&mut self, candidate: CandidateAddress) -> bool {
        if self.candidates.contains(&candidate) {
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    pub fn contains(&self, candidate: &CandidateAddress) -> bool {
        self.candidates.contains(candidate)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateAddress> {
        self.candidates.iter()
    }

    pub fn into_vec(self) -> Vec<CandidateAddress> {
        self.candidates
    }
}

impl Extend<CandidateAddress> for CandidateSet {
    fn extend<I: IntoIterator<Item = CandidateAddress>>(&mut self, iter: I) {
        for candidate in iter {
            self.insert(candidate);
        }
    }
}

impl FromIterator<CandidateAddress> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = CandidateAddress>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for CandidateSet {
    type Item = CandidateAddress;
    type IntoIter = std::vec::IntoIter<CandidateAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

/// IPv4 169.254.0.0/16 or IPv6 fe80::/10
pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => is_link_local_v6(v6),
    }
}

pub(crate) fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

fn parse_host(address: &str) -> Result<(CandidateHost, Option<String>), AddressParseError> {
    let invalid = || AddressParseError::InvalidAddress(address.to_string());

    let unbracketed = match address.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(invalid)?,
        None => address,
    };
    if unbracketed.is_empty() {
        return Err(invalid());
    }

    let (host, zone) = match unbracketed.split_once('%') {
        Some((host, zone)) => (host, Some(zone)),
        None => (unbracketed, None),
    };

    if let Some(zone) = zone {
        let valid_zone = !zone.is_empty()
            && zone
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid_zone {
            return Err(AddressParseError::InvalidZone {
                address: address.to_string(),
                zone: zone.to_string(),
            });
        }
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok((CandidateHost::Ip(ip), zone.map(str::to_string)));
    }

    let valid_name = zone.is_none()
        && !host.starts_with(&['-', '.'][..])
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'));
    if !valid_name {
        return Err(invalid());
    }

    Ok((CandidateHost::Name(host.to_ascii_lowercase()), None))
}

#[cfg(unix)]
fn scope_index(zone: &str) -> io::Result<u32> {
    if let Ok(index) = zone.parse::<u32>() {
        return Ok(index);
    }

    let name = std::ffi::CString::new(zone)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no interface named {}", zone),
        ));
    }
    Ok(index)
}

#[cfg(not(unix))]
fn scope_index(zone: &str) -> io::Result<u32> {
    zone.parse::<u32>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_forms() {
        let v4 = CandidateAddress::literal("192.168.1.5", 10001).unwrap();
        assert_eq!(v4.ip(), Some("192.168.1.5".parse().unwrap()));
        assert_eq!(v4.source(), CandidateSource::Literal);

        let scoped = CandidateAddress::literal("fe80::1%wlan0", 10001).unwrap();
        assert_eq!(scoped.zone(), Some("wlan0"));
        assert_eq!(scoped.to_string(), "[fe80::1%wlan0]:10001");

        let bracketed = CandidateAddress::literal("[2001:db8::1]", 5).unwrap();
        assert_eq!(bracketed.ip(), Some("2001:db8::1".parse().unwrap()));

        let name = CandidateAddress::literal(" Phone.LAN ", 7).unwrap();
        assert_eq!(name.host(), &CandidateHost::Name("phone.lan".to_string()));
        assert_eq!(name.to_string(), "phone.lan:7");
    }

    #[test]
    fn test_literal_rejects_garbage() {
        assert!(CandidateAddress::literal("", 1).is_err());
        assert!(CandidateAddress::literal("not a host", 1).is_err());
        assert!(CandidateAddress::literal("aa:bb:cc", 1).is_err());
        assert!(CandidateAddress::literal("host%eth0", 1).is_err());
        assert!(matches!(
            CandidateAddress::literal("fe80::1%", 1),
            Err(AddressParseError::InvalidZone { .. })
        ));
    }

    #[test]
    fn test_identity_ignores_source() {
        let a = CandidateAddress::literal("10.0.0.1", 1).unwrap();
        let b = a.clone().with_source(CandidateSource::NeighborTable);
        assert_eq!(a, b);

        let c = CandidateAddress::literal("10.0.0.1", 2).unwrap();
        assert_ne!(a, c);

        let d = CandidateAddress::literal("fe80::1%eth0", 1).unwrap();
        let e = CandidateAddress::literal("fe80::1%wlan0", 1).unwrap();
        assert_ne!(d, e);
    }

    #[test]
    fn test_from_str_round_trips_display() {
        for s in ["1.2.3.4:10001", "[fe80::1%wlan0]:10001", "[::]:1", "example.org:443"] {
            let parsed: CandidateAddress = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
            assert_eq!(parsed.source(), CandidateSource::LastWorking);
        }
    }

    #[test]
    fn test_from_str_errors() {
        assert!(matches!(
            "1.2.3.4".parse::<CandidateAddress>(),
            Err(AddressParseError::InvalidPort(_))
        ));
        assert!(matches!(
            "1.2.3.4:99999".parse::<CandidateAddress>(),
            Err(AddressParseError::InvalidPort(_))
        ));
        assert!(matches!(
            "fe80::1:80".parse::<CandidateAddress>(),
            Err(AddressParseError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_set_collapses_duplicates() {
        let mut set = CandidateSet::new();
        assert!(set.insert(CandidateAddress::literal("10.0.0.1", 1).unwrap()));
        assert!(!set.insert(
            CandidateAddress::literal("10.0.0.1", 1)
                .unwrap()
                .with_source(CandidateSource::NeighborTable)
        ));
        assert!(set.insert(CandidateAddress::literal("10.0.0.2", 1).unwrap()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().source(), CandidateSource::Literal);
    }

    #[test]
    fn test_link_local() {
        assert!(is_link_local(&"169.254.10.1".parse().unwrap()));
        assert!(is_link_local(&"fe80::1".parse().unwrap()));
        assert!(is_link_local(&"febf::1".parse().unwrap()));
        assert!(!is_link_local(&"fec0::1".parse().unwrap()));
        assert!(!is_link_local(&"192.168.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_resolve_ip_literals() {
        let v4 = CandidateAddress::literal("127.0.0.1", 9).unwrap();
        assert_eq!(v4.resolve().await.unwrap(), vec!["127.0.0.1:9".parse().unwrap()]);

        let v6 = CandidateAddress::literal("fe80::1%7", 9).unwrap();
        let resolved = v6.resolve().await.unwrap();
        match resolved[0] {
            SocketAddr::V6(addr) => assert_eq!(addr.scope_id(), 7),
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_zone_fails() {
        let v6 = CandidateAddress::literal("fe80::1%nosuchif0", 9).unwrap();
        assert!(v6.resolve().await.is_err());
    }
}
