use std::net::{IpAddr, Ipv6Addr};

use ipnet::IpNet;

/// Prefix length of the IPv4-mapped IPv6 block `::ffff:0:0/96`.
const V4_MAPPED_PREFIX: u8 = 96;

/// A binary prefix trie over the 128-bit IPv6 address space.
///
/// IPv4 addresses and networks are stored as IPv4-mapped IPv6 addresses, so
/// `10.0.0.0/8` and `::ffff:10.0.0.0/104` are the same entry and a single walk
/// answers both address families.
#[derive(Debug, Clone)]
pub struct PrefixTrie {
    root: TrieNode,
    entries: usize,
}

#[derive(Debug, Clone)]
struct TrieNode {
    children: [Option<Box<TrieNode>>; 2],
    is_terminal: bool,
}

impl TrieNode {
    fn new() -> Self {
        Self {
            children: [None, None],
            is_terminal: false,
        }
    }
}

/// Map an address into IPv6 space.
pub fn to_v6(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// Map a network into IPv6 space, returning the network bits and prefix length.
fn network_bits(network: &IpNet) -> (u128, u8) {
    match network {
        IpNet::V4(net) => (
            u128::from(net.network().to_ipv6_mapped()),
            net.prefix_len() + V4_MAPPED_PREFIX,
        ),
        IpNet::V6(net) => (u128::from(net.network()), net.prefix_len()),
    }
}

fn bit_at(bits: u128, index: u8) -> usize {
    ((bits >> (127 - index as u32)) & 1) as usize
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
            entries: 0,
        }
    }

    /// Insert a CIDR network. Any address inside it matches afterwards.
    pub fn insert(&mut self, network: IpNet) {
        let (bits, prefix_len) = network_bits(&network);

        let mut current = &mut self.root;
        for index in 0..prefix_len {
            let idx = bit_at(bits, index);
            current = current.children[idx].get_or_insert_with(|| Box::new(TrieNode::new()));
        }
        if !current.is_terminal {
            current.is_terminal = true;
            self.entries += 1;
        }
    }

    /// Returns `true` if any inserted network contains `addr`.
    ///
    /// Walks the address bit by bit and stops at the first terminal node, so
    /// a `/16` entry matches every address inside it.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let bits = u128::from(to_v6(addr));

        let mut current = &self.root;
        if current.is_terminal {
            return true;
        }
        for index in 0..128u8 {
            match &current.children[bit_at(bits, index)] {
                Some(node) => {
                    current = node;
                    if current.is_terminal {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    /// Number of distinct networks inserted.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

impl Default for PrefixTrie {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a bare address in a host-sized network.
pub fn host_network(addr: IpAddr) -> Option<IpNet> {
    let prefix_len = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    IpNet::new(addr, prefix_len).ok()
}

/// Unwrap IPv4-mapped IPv6 addresses back to IPv4 for display.
pub fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}
