//! IP membership sets for firewall lists, bypass lists and endpoint allow
//! lists.
//!
//! All lookups happen in IPv6 space: IPv4 entries and addresses are mapped to
//! `::ffff:a.b.c.d`, so a single [`PrefixTrie`] walk answers both families and
//! mapped client addresses match plain IPv4 entries.

mod list;
mod private;
mod set;
mod trie;

pub use list::{IpListCollection, IpListMatch, ListLookup, NamedIpList};
pub use private::{is_loopback, is_private_ip};
pub use set::{parse_entry, IpSet};
pub use trie::{canonical, PrefixTrie};
