use std::net::IpAddr;

use once_cell::sync::Lazy;

use crate::set::IpSet;
use crate::trie::canonical;

/// Special-purpose ranges that never need to be on an allow list.
const PRIVATE_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.31.196.0/24",
    "192.52.193.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "192.175.48.0/24",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "100::/64",
    "2001:db8::/32",
    "3fff::/20",
];

static PRIVATE_SET: Lazy<IpSet> = Lazy::new(|| IpSet::from_entries(PRIVATE_RANGES));

/// Private, reserved or otherwise non-routable address. IPv4-mapped IPv6
/// forms are covered by the IPv4 ranges.
pub fn is_private_ip(ip: &str) -> bool {
    PRIVATE_SET.contains_str(ip)
}

/// Loopback in either family, including `::ffff:127.0.0.1`.
pub fn is_loopback(ip: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(addr) => canonical(addr).is_loopback(),
        Err(_) => false,
    }
}
