//! Deny lists of IP addresses and CIDR ranges.
//!
//! A [`DenyList`] is matched against the *resolved* remote address of a
//! connection. Hostnames are never matched: a host that is not an IP literal
//! is always allowed, so the check must run after name resolution.

use std::convert::Infallible;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net};

use crate::error::{Error, Result};

/// A single parsed deny-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyEntry {
    /// A CIDR range such as `10.0.0.0/8` or `fc00::/7`.
    Net(IpNet),
    /// A literal address such as `169.254.169.254` or `::1`.
    Addr(IpAddr),
}

impl DenyEntry {
    /// Parse an entry, returning `None` if it is neither a CIDR range nor an IP.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();

        if let Ok(net) = entry.parse::<IpNet>() {
            return Some(Self::Net(canonical_net(net)));
        }

        entry
            .parse::<IpAddr>()
            .ok()
            .map(|ip| Self::Addr(ip.to_canonical()))
    }

    /// Check whether `ip` falls under this entry.
    ///
    /// `ip` is expected in canonical form (see [`IpAddr::to_canonical`]).
    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            Self::Net(net) => net.contains(&ip),
            Self::Addr(addr) => *addr == ip,
        }
    }
}

impl fmt::Display for DenyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net(net) => net.fmt(f),
            Self::Addr(addr) => addr.fmt(f),
        }
    }
}

/// IPv4-mapped IPv6 ranges (`::ffff:a.b.c.d/n`, n >= 96) describe IPv4 hosts.
fn canonical_net(net: IpNet) -> IpNet {
    if let IpNet::V6(v6) = net {
        if v6.prefix_len() >= 96 {
            if let Some(v4) = v6.addr().to_ipv4_mapped() {
                if let Ok(v4net) = Ipv4Net::new(v4, v6.prefix_len() - 96) {
                    return IpNet::V4(v4net);
                }
            }
        }
    }
    net
}

/// An immutable set of denied addresses and ranges.
///
/// Entries that fail to parse are dropped when the list is built; they could
/// never match anything.
///
/// # Example
///
/// ```rust
/// use dialguard::DenyList;
///
/// let deny: DenyList = ["10.0.0.0/8", "169.254.169.254"].into_iter().collect();
///
/// assert!(deny.is_denied("10.1.2.3:443").unwrap());
/// assert!(deny.is_denied("169.254.169.254:80").unwrap());
/// assert!(!deny.is_denied("93.184.216.34:443").unwrap());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyList {
    entries: Vec<DenyEntry>,
}

impl DenyList {
    /// An empty deny list. Allows everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, consuming and returning the list.
    ///
    /// Invalid entries are silently ignored.
    pub fn with_entry(mut self, entry: &str) -> Self {
        if let Some(entry) = DenyEntry::parse(entry) {
            self.entries.push(entry);
        }
        self
    }

    /// Number of usable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DenyEntry> {
        self.entries.iter()
    }

    /// Return the first entry that matches `ip`, if any.
    pub fn find(&self, ip: IpAddr) -> Option<&DenyEntry> {
        let ip = ip.to_canonical();
        self.entries.iter().find(|entry| entry.matches(ip))
    }

    /// Check an already-resolved IP address.
    pub fn matches(&self, ip: IpAddr) -> bool {
        self.find(ip).is_some()
    }

    /// Check a resolved `host:port` address.
    ///
    /// Returns `Ok(true)` when the host is an IP covered by an entry, and
    /// `Ok(false)` when it is not, including when the host is not an IP
    /// literal at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressFormat`] if `addr` is not in `host:port` form.
    pub fn is_denied(&self, addr: &str) -> Result<bool> {
        let (host, _port) = split_host_port(addr)?;

        Ok(parse_host_ip(host).is_some_and(|ip| self.matches(ip)))
    }
}

impl<S: AsRef<str>> FromIterator<S> for DenyList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .filter_map(|entry| DenyEntry::parse(entry.as_ref()))
                .collect(),
        }
    }
}

impl Extend<DenyEntry> for DenyList {
    fn extend<I: IntoIterator<Item = DenyEntry>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

/// Parses a comma and/or whitespace separated list, e.g. `"10.0.0.0/8, ::1"`.
impl FromStr for DenyList {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|entry| !entry.is_empty())
            .collect())
    }
}

/// Check `addr` against a list of raw entry strings.
///
/// Equivalent to collecting `hosts` into a [`DenyList`] and calling
/// [`DenyList::is_denied`]. Prefer building the list once when checking
/// many addresses.
pub fn is_denied<S: AsRef<str>>(hosts: &[S], addr: &str) -> Result<bool> {
    let (host, _port) = split_host_port(addr)?;

    let Some(ip) = parse_host_ip(host) else {
        return Ok(false);
    };

    let ip = ip.to_canonical();
    Ok(hosts
        .iter()
        .filter_map(|entry| DenyEntry::parse(entry.as_ref()))
        .any(|entry| entry.matches(ip)))
}

/// Parse the host part of an address as an IP, ignoring any IPv6 zone.
fn parse_host_ip(host: &str) -> Option<IpAddr> {
    let host = match host.split_once('%') {
        Some((ip, _zone)) if ip.contains(':') => ip,
        _ => host,
    };
    host.parse().ok()
}

/// Split `host:port` or `[host]:port` into its parts.
///
/// Brackets are removed from the host. The port may be empty but the
/// separator is required.
pub(crate) fn split_host_port(addr: &str) -> Result<(&str, &str)> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::address_format(addr, "missing ']' in address"))?;
        if rest[..end].contains('[') {
            return Err(Error::address_format(addr, "unexpected '[' in address"));
        }

        let port = match &rest[end + 1..] {
            "" => return Err(Error::address_format(addr, "missing port in address")),
            tail => tail
                .strip_prefix(':')
                .ok_or_else(|| Error::address_format(addr, "unexpected characters after ']'"))?,
        };

        (&rest[..end], port)
    } else {
        let idx = addr
            .rfind(':')
            .ok_or_else(|| Error::address_format(addr, "missing port in address"))?;

        let host = &addr[..idx];
        if host.contains(':') {
            return Err(Error::address_format(addr, "too many colons in address"));
        }
        if host.contains('[') || host.contains(']') {
            return Err(Error::address_format(addr, "unexpected bracket in address"));
        }

        (host, &addr[idx + 1..])
    };

    if port.contains('[') || port.contains(']') {
        return Err(Error::address_format(addr, "unexpected bracket in port"));
    }

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deny(entries: &[&str]) -> DenyList {
        entries.iter().collect()
    }

    // ==================== Address matching ====================

    #[test]
    fn test_cidr_denies_inside() {
        let list = deny(&["10.0.0.0/8"]);
        assert!(list.is_denied("10.1.2.3:443").unwrap());
    }

    #[test]
    fn test_cidr_allows_outside() {
        let list = deny(&["10.0.0.0/8"]);
        assert!(!list.is_denied("93.184.216.34:443").unwrap());
    }

    #[test]
    fn test_metadata_literal_denied() {
        let list = deny(&["169.254.169.254"]);
        assert!(list.is_denied("169.254.169.254:80").unwrap());
        assert!(!list.is_denied("169.254.169.253:80").unwrap());
    }

    #[test]
    fn test_empty_list_allows_everything() {
        let list = DenyList::new();
        assert!(list.is_empty());
        assert!(!list.is_denied("127.0.0.1:80").unwrap());
        assert!(!list.is_denied("[::1]:80").unwrap());
        assert!(!list.is_denied("169.254.169.254:80").unwrap());
    }

    #[test]
    fn test_cidr_boundaries() {
        let list = deny(&["172.16.0.0/12"]);
        assert!(list.is_denied("172.16.0.0:80").unwrap());
        assert!(list.is_denied("172.31.255.255:80").unwrap());
        assert!(!list.is_denied("172.15.255.255:80").unwrap());
        assert!(!list.is_denied("172.32.0.0:80").unwrap());
    }

    #[test]
    fn test_single_host_cidr() {
        let list = deny(&["192.168.1.100/32"]);
        assert!(list.is_denied("192.168.1.100:8080").unwrap());
        assert!(!list.is_denied("192.168.1.101:8080").unwrap());
    }

    #[test]
    fn test_cidr_with_host_bits_set() {
        // Host bits are ignored, the network is 10.0.0.0/8
        let list = deny(&["10.9.9.9/8"]);
        assert!(list.is_denied("10.0.0.1:80").unwrap());
        assert!(!list.is_denied("11.0.0.1:80").unwrap());
    }

    #[test]
    fn test_ipv6_cidr() {
        let list = deny(&["fc00::/7"]);
        assert!(list.is_denied("[fd12:3456:789a::1]:443").unwrap());
        assert!(list.is_denied("[fc00::]:443").unwrap());
        assert!(!list.is_denied("[fe00::]:443").unwrap());
        assert!(!list.is_denied("[2001:db8::1]:443").unwrap());
    }

    #[test]
    fn test_no_cross_family_matching() {
        let list = deny(&["0.0.0.0/0"]);
        assert!(list.is_denied("8.8.8.8:53").unwrap());
        assert!(!list.is_denied("[2001:4860:4860::8888]:53").unwrap());

        let list = deny(&["::/0"]);
        assert!(list.is_denied("[2001:4860:4860::8888]:53").unwrap());
        assert!(!list.is_denied("8.8.8.8:53").unwrap());
    }

    #[test]
    fn test_ipv6_literal_normalized() {
        let list = deny(&["::1"]);
        assert!(list.is_denied("[::1]:80").unwrap());
        assert!(list.is_denied("[0:0:0:0:0:0:0:1]:80").unwrap());
        assert!(list.is_denied("[0000:0000:0000:0000:0000:0000:0000:0001]:80").unwrap());

        let list = deny(&["0:0:0:0:0:0:0:1"]);
        assert!(list.is_denied("[::1]:80").unwrap());
    }

    #[test]
    fn test_ipv6_literal_case_insensitive() {
        let list = deny(&["FD00:EC2::254"]);
        assert!(list.is_denied("[fd00:ec2::254]:80").unwrap());
    }

    #[test]
    fn test_ipv4_mapped_matches_ipv4_entries() {
        let list = deny(&["10.0.0.0/8", "169.254.169.254"]);
        assert!(list.is_denied("[::ffff:10.1.2.3]:443").unwrap());
        assert!(list.is_denied("[::ffff:a9fe:a9fe]:80").unwrap());
        assert!(!list.is_denied("[::ffff:93.184.216.34]:443").unwrap());
    }

    #[test]
    fn test_ipv4_mapped_entries_match_ipv4() {
        let list = deny(&["::ffff:127.0.0.1", "::ffff:10.0.0.0/104"]);
        assert!(list.is_denied("127.0.0.1:80").unwrap());
        assert!(list.is_denied("10.200.0.1:80").unwrap());
        assert!(!list.is_denied("11.0.0.1:80").unwrap());
    }

    #[test]
    fn test_zone_is_ignored() {
        let list = deny(&["fe80::/10"]);
        assert!(list.is_denied("[fe80::1%eth0]:80").unwrap());
    }

    #[test]
    fn test_hostname_never_denied() {
        let list = deny(&["0.0.0.0/0", "::/0"]);
        assert!(!list.is_denied("localhost:80").unwrap());
        assert!(!list.is_denied("metadata.google.internal:80").unwrap());
    }

    #[test]
    fn test_first_match_wins() {
        let list = deny(&["10.0.0.0/8", "10.1.2.3"]);
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(list.find(ip), list.iter().next());
        assert!(list.matches(ip));
    }

    #[test]
    fn test_matching_is_idempotent() {
        let list = deny(&["10.0.0.0/8", "::1"]);
        for addr in ["10.1.2.3:443", "[::1]:80", "93.184.216.34:443"] {
            assert_eq!(
                list.is_denied(addr).unwrap(),
                list.is_denied(addr).unwrap()
            );
        }
    }

    // ==================== Entry parsing ====================

    #[test]
    fn test_invalid_entries_skipped() {
        let list = deny(&["not-an-ip", "10.0.0.0/33", "", "10.0.0.0/8", "1.2.3"]);
        assert_eq!(list.len(), 1);
        assert!(list.is_denied("10.1.2.3:443").unwrap());
    }

    #[test]
    fn test_leading_zero_entries_skipped() {
        // Non-canonical octets are not valid literals
        assert_eq!(DenyEntry::parse("1.2.3.04"), None);
        assert_eq!(DenyEntry::parse("01.2.3.4"), None);
    }

    #[test]
    fn test_leading_zero_host_not_denied() {
        let list = deny(&["1.2.3.4"]);
        assert!(!list.is_denied("1.2.3.04:80").unwrap());
    }

    #[test]
    fn test_entry_display() {
        assert_eq!(DenyEntry::parse(" 10.0.0.0/8 ").unwrap().to_string(), "10.0.0.0/8");
        assert_eq!(DenyEntry::parse("0:0::1").unwrap().to_string(), "::1");
    }

    #[test]
    fn test_from_str() {
        let list: DenyList = "10.0.0.0/8, 169.254.169.254 ::1,,bogus".parse().unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.is_denied("[::1]:80").unwrap());
    }

    #[test]
    fn test_with_entry_builder() {
        let list = DenyList::new()
            .with_entry("127.0.0.0/8")
            .with_entry("garbage")
            .with_entry("::1");
        assert_eq!(list.len(), 2);
        assert!(list.is_denied("127.0.0.1:80").unwrap());
    }

    // ==================== Address format ====================

    #[test]
    fn test_missing_port_is_error() {
        let list = deny(&["10.0.0.0/8"]);
        let err = list.is_denied("10.1.2.3").unwrap_err();
        assert!(matches!(err, Error::AddressFormat { .. }));
        assert!(!err.is_denied());
    }

    #[test]
    fn test_unbracketed_ipv6_is_error() {
        let list = deny(&["::1"]);
        assert!(matches!(
            list.is_denied("::1:80"),
            Err(Error::AddressFormat { .. })
        ));
    }

    #[test]
    fn test_bracket_errors() {
        assert!(split_host_port("[::1:80").is_err());
        assert!(split_host_port("[::1]").is_err());
        assert!(split_host_port("[::1]x80").is_err());
        assert!(split_host_port("a]b:80").is_err());
        assert!(split_host_port("host:[80]").is_err());
        assert!(split_host_port("[[::1]:80").is_err());
        assert!(split_host_port("[::[1]:80").is_err());
    }

    #[test]
    fn test_nested_bracket_is_not_allowed_through() {
        let list = deny(&["::1"]);
        assert!(matches!(
            list.is_denied("[[::1]:80"),
            Err(Error::AddressFormat { .. })
        ));
        assert!(matches!(
            is_denied(&["::1"], "[[::1]:80"),
            Err(Error::AddressFormat { .. })
        ));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("10.0.0.1:80").unwrap(), ("10.0.0.1", "80"));
        assert_eq!(split_host_port("[::1]:443").unwrap(), ("::1", "443"));
        assert_eq!(split_host_port("example.com:").unwrap(), ("example.com", ""));
        assert_eq!(split_host_port(":80").unwrap(), ("", "80"));
    }

    // ==================== String-slice form ====================

    #[test]
    fn test_is_denied_with_strings() {
        let hosts = vec!["10.0.0.0/8".to_string(), "169.254.169.254".to_string()];
        assert!(is_denied(&hosts, "10.1.2.3:443").unwrap());
        assert!(is_denied(&hosts, "169.254.169.254:80").unwrap());
        assert!(!is_denied(&hosts, "93.184.216.34:443").unwrap());
        assert!(!is_denied::<&str>(&[], "10.1.2.3:443").unwrap());
        assert!(is_denied(&hosts, "no-port").is_err());
    }
}
