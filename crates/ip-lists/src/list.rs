use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::set::IpSet;

/// A named, described IP list as delivered by the cloud.
#[derive(Debug, Clone)]
pub struct NamedIpList {
    pub key: String,
    pub source: String,
    pub description: String,
    pub set: IpSet,
}

impl NamedIpList {
    pub fn new<I, S>(key: &str, source: &str, description: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            key: key.to_string(),
            source: source.to_string(),
            description: description.to_string(),
            set: IpSet::from_entries(entries),
        }
    }
}

/// A list that matched an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpListMatch {
    pub key: String,
    pub description: String,
}

/// Outcome of looking an address up in a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListLookup {
    /// No lists configured, or the address did not parse.
    NoConfig,
    NotFound,
    Found,
}

/// An ordered collection of named lists. Lookups report every list that
/// contains the address, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct IpListCollection {
    lists: Vec<NamedIpList>,
}

impl IpListCollection {
    pub fn new(lists: Vec<NamedIpList>) -> Self {
        Self { lists }
    }

    pub fn push(&mut self, list: NamedIpList) {
        self.lists.push(list);
    }

    /// Every list containing `ip`, plus whether any list was consulted at all.
    pub fn lookup(&self, ip: &str) -> (ListLookup, Vec<IpListMatch>) {
        if self.lists.is_empty() {
            return (ListLookup::NoConfig, Vec::new());
        }
        let Ok(addr) = ip.trim().parse::<IpAddr>() else {
            return (ListLookup::NoConfig, Vec::new());
        };

        let matches: Vec<IpListMatch> = self
            .lists
            .iter()
            .filter(|list| list.set.contains(addr))
            .map(|list| IpListMatch {
                key: list.key.clone(),
                description: list.description.clone(),
            })
            .collect();

        if matches.is_empty() {
            (ListLookup::NotFound, matches)
        } else {
            (ListLookup::Found, matches)
        }
    }

    pub fn matches(&self, ip: &str) -> Vec<IpListMatch> {
        self.lookup(ip).1
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.lookup(ip).0 == ListLookup::Found
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedIpList> {
        self.lists.iter()
    }
}
