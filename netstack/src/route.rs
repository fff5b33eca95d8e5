//! Routing table and longest-prefix match.

use std::fmt;
use std::net::{AddrParseError, Ipv4Addr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("expected CIDR of the form a.b.c.d/n, got {0:?}")]
    MissingPrefixLength(String),
    #[error("invalid address: {0}")]
    Address(#[from] AddrParseError),
    #[error("prefix length {0:?} is not in 0..=32")]
    PrefixLength(String),
}

/// An address prefix, `a.b.c.d/n`.
///
/// Host bits beyond the prefix length are kept as written but never take
/// part in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: Ipv4Addr,
    len: u8,
}

impl Cidr {
    /// `None` if `len` exceeds 32.
    pub fn new(addr: Ipv4Addr, len: u8) -> Option<Self> {
        (len <= 32).then_some(Self { addr, len })
    }

    fn mask(&self) -> u32 {
        // A shift by 32 would overflow; /0 matches everything.
        u32::MAX.checked_shl(32 - u32::from(self.len)).unwrap_or(0)
    }

    /// Number of matching leading bits if `addr` falls inside this prefix.
    pub fn match_len(&self, addr: Ipv4Addr) -> Option<u8> {
        let mask = self.mask();
        (u32::from(self.addr) & mask == u32::from(addr) & mask).then_some(self.len)
    }
}

impl FromStr for Cidr {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| RouteError::MissingPrefixLength(s.to_string()))?;
        let addr: Ipv4Addr = addr.trim().parse()?;
        let len: u8 = len
            .trim()
            .parse()
            .map_err(|_| RouteError::PrefixLength(len.to_string()))?;
        Cidr::new(addr, len).ok_or_else(|| RouteError::PrefixLength(len.to_string()))
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

/// One forwarding rule: datagrams for `prefix` go to `next_hop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingEntry {
    pub prefix: Cidr,
    pub next_hop: Ipv4Addr,
}

/// Ordered forwarding rules.  Insertion order breaks ties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    entries: Vec<RoutingEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(cidr, next_hop)` strings such as
    /// `("10.0.0.0/8", "10.0.0.2")`.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut table = Self::new();
        for (cidr, next_hop) in pairs {
            table.push(cidr.parse()?, next_hop.trim().parse()?);
        }
        Ok(table)
    }

    pub fn push(&mut self, prefix: Cidr, next_hop: Ipv4Addr) {
        self.entries.push(RoutingEntry { prefix, next_hop });
    }

    /// Longest-prefix match.
    ///
    /// Walks the entries in order and keeps the one with strictly more
    /// matching bits than any seen so far, so the earliest entry wins a tie.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        let mut best: Option<(u8, Ipv4Addr)> = None;
        for entry in &self.entries {
            let Some(bits) = entry.prefix.match_len(dst) else {
                continue;
            };
            if best.map_or(true, |(best_bits, _)| bits > best_bits) {
                best = Some((bits, entry.next_hop));
            }
        }
        best.map(|(_, next_hop)| next_hop)
    }
}

impl FromIterator<RoutingEntry> for RoutingTable {
    fn from_iter<T: IntoIterator<Item = RoutingEntry>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn table(pairs: &[(&str, &str)]) -> RoutingTable {
        RoutingTable::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let t = table(&[("10.0.0.0/8", "1.1.1.1"), ("10.1.0.0/16", "2.2.2.2")]);
        assert_eq!(t.lookup(ip("10.1.2.3")), Some(ip("2.2.2.2")));
        assert_eq!(t.lookup(ip("10.2.3.4")), Some(ip("1.1.1.1")));
    }

    #[test]
    fn longest_prefix_wins_regardless_of_order() {
        let t = table(&[("10.1.0.0/16", "2.2.2.2"), ("10.0.0.0/8", "1.1.1.1")]);
        assert_eq!(t.lookup(ip("10.1.2.3")), Some(ip("2.2.2.2")));
    }

    #[test]
    fn equal_length_tie_goes_to_first_inserted() {
        let t = table(&[("10.0.0.0/8", "1.1.1.1"), ("10.0.0.0/8", "2.2.2.2")]);
        assert_eq!(t.lookup(ip("10.9.9.9")), Some(ip("1.1.1.1")));
    }

    #[test]
    fn no_matching_entry_is_no_route() {
        let t = table(&[("10.0.0.0/8", "1.1.1.1")]);
        assert_eq!(t.lookup(ip("192.168.0.1")), None);
        assert_eq!(RoutingTable::new().lookup(ip("10.0.0.1")), None);
    }

    #[test]
    fn default_route_matches_everything_but_loses_to_specific() {
        let t = table(&[("0.0.0.0/0", "9.9.9.9"), ("192.168.0.0/24", "3.3.3.3")]);
        assert_eq!(t.lookup(ip("8.8.8.8")), Some(ip("9.9.9.9")));
        assert_eq!(t.lookup(ip("192.168.0.77")), Some(ip("3.3.3.3")));
    }

    #[test]
    fn host_route_matches_exactly_one_address() {
        let t = table(&[("10.0.0.5/32", "4.4.4.4")]);
        assert_eq!(t.lookup(ip("10.0.0.5")), Some(ip("4.4.4.4")));
        assert_eq!(t.lookup(ip("10.0.0.6")), None);
    }

    #[test]
    fn non_octet_prefix_lengths_match_bitwise() {
        let t = table(&[("172.16.0.0/12", "5.5.5.5")]);
        assert_eq!(t.lookup(ip("172.31.255.255")), Some(ip("5.5.5.5")));
        assert_eq!(t.lookup(ip("172.32.0.0")), None);
    }

    #[test]
    fn cidr_parse_errors() {
        assert!(matches!(
            "10.0.0.0".parse::<Cidr>(),
            Err(RouteError::MissingPrefixLength(_))
        ));
        assert!(matches!("10.0.0/8".parse::<Cidr>(), Err(RouteError::Address(_))));
        assert!(matches!(
            "10.0.0.0/33".parse::<Cidr>(),
            Err(RouteError::PrefixLength(_))
        ));
        assert!(matches!(
            "10.0.0.0/x".parse::<Cidr>(),
            Err(RouteError::PrefixLength(_))
        ));
    }

    #[test]
    fn cidr_displays_as_written() {
        let cidr: Cidr = "10.1.0.0/16".parse().unwrap();
        assert_eq!(cidr.to_string(), "10.1.0.0/16");
        assert_eq!(cidr.match_len(Ipv4Addr::new(10, 1, 200, 3)), Some(16));
    }
}
