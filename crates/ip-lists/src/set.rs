use std::net::IpAddr;

use ipnet::IpNet;
use tracing::warn;

use crate::trie::{host_network, PrefixTrie};

/// An immutable set of addresses and CIDR ranges.
#[derive(Debug, Clone, Default)]
pub struct IpSet {
    trie: PrefixTrie,
}

/// Parse one list entry as CIDR notation first, then as a bare address.
pub fn parse_entry(entry: &str) -> Option<IpNet> {
    let trimmed = entry.trim();
    if let Ok(network) = trimmed.parse::<IpNet>() {
        return Some(network);
    }
    trimmed.parse::<IpAddr>().ok().and_then(host_network)
}

impl IpSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from textual entries. Entries that are neither an address
    /// nor a CIDR range are logged and skipped.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trie = PrefixTrie::new();
        let mut skipped = 0usize;
        for entry in entries {
            let entry = entry.as_ref();
            if entry.trim().is_empty() {
                continue;
            }
            match parse_entry(entry) {
                Some(network) => trie.insert(network),
                None => {
                    skipped += 1;
                    warn!(entry, "skipping unparseable IP list entry");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, kept = trie.len(), "IP list contained invalid entries");
        }
        Self { trie }
    }

    pub fn insert(&mut self, network: IpNet) {
        self.trie.insert(network);
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.trie.contains(addr)
    }

    /// Textual lookup; unparseable input never matches.
    pub fn contains_str(&self, ip: &str) -> bool {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => self.contains(addr),
            Err(_) => false,
        }
    }

    /// Number of distinct networks in the set.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}
