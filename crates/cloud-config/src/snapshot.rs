use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rasp_common::{compile_route_pattern, is_wildcard_endpoint, WILDCARD};
use rasp_ip_lists::{
    is_private_ip, IpListCollection, IpListMatch, IpSet, ListLookup, NamedIpList,
};
use rasp_rate_limit::{RateLimitRule, RuleBounds};
use regex::Regex;
use serde::Serialize;

use crate::wire::{CloudConfigDocument, EndpointConfig, FirewallLists, IpListData};

/// Tri-state global blocking switch. `Unknown` means the cloud never said.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockFlag {
    #[default]
    Unknown,
    On,
    Off,
}

impl From<Option<bool>> for BlockFlag {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => BlockFlag::Unknown,
            Some(true) => BlockFlag::On,
            Some(false) => BlockFlag::Off,
        }
    }
}

/// Compiled protection settings of one configured endpoint.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    pub method: String,
    pub route: String,
    pub force_protection_off: bool,
    pub allowed_ips: IpSet,
    pub rate_limit: Option<RateLimitRule>,
}

impl EndpointPolicy {
    pub fn has_allowlist(&self) -> bool {
        !self.allowed_ips.is_empty()
    }

    fn compile(endpoint: &EndpointConfig, method: &str, bounds: &RuleBounds) -> Self {
        let limiting = &endpoint.rate_limiting;
        let rate_limit = if limiting.enabled {
            match RateLimitRule::validated(
                method,
                &endpoint.route,
                limiting.max_requests,
                limiting.window_size_in_ms,
                bounds,
            ) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(error = %e, "rejected rate limit, endpoint kept without it");
                    None
                }
            }
        } else {
            None
        };

        Self {
            method: method.to_string(),
            route: endpoint.route.clone(),
            force_protection_off: endpoint.force_protection_off,
            allowed_ips: IpSet::from_entries(&endpoint.allowed_ip_addresses),
            rate_limit,
        }
    }
}

/// Serializable summary of an endpoint, for the config view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub method: String,
    pub route: String,
    pub force_protection_off: bool,
    pub allowed_ip_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_buckets: Option<usize>,
}

impl From<&EndpointPolicy> for EndpointSummary {
    fn from(policy: &EndpointPolicy) -> Self {
        Self {
            method: policy.method.clone(),
            route: policy.route.clone(),
            force_protection_off: policy.force_protection_off,
            allowed_ip_count: policy.allowed_ips.len(),
            max_requests: policy.rate_limit.as_ref().map(|r| r.max_requests),
            window_buckets: policy.rate_limit.as_ref().map(|r| r.window_buckets),
        }
    }
}

struct WildcardPolicy {
    pattern: Regex,
    policy: Arc<EndpointPolicy>,
}

/// Compiled firewall lists. Shared between snapshots when a newer config
/// arrives without lists of its own.
#[derive(Default)]
pub struct CompiledLists {
    blocked_ips: IpListCollection,
    allowed_ips: IpListCollection,
    monitored_ips: IpListCollection,
    blocked_user_agents: Option<Regex>,
    monitored_user_agents: Option<Regex>,
    user_agent_details: Vec<(String, Regex)>,
}

impl CompiledLists {
    pub fn compile(lists: &FirewallLists) -> Self {
        Self {
            blocked_ips: collection(&lists.blocked_ip_addresses),
            allowed_ips: collection(&lists.allowed_ip_addresses),
            monitored_ips: collection(&lists.monitored_ip_addresses),
            blocked_user_agents: user_agent_pattern("blocked", &lists.blocked_user_agents),
            monitored_user_agents: user_agent_pattern("monitored", &lists.monitored_user_agents),
            user_agent_details: lists
                .user_agent_details
                .iter()
                .filter_map(|detail| {
                    user_agent_pattern(&detail.key, &detail.pattern)
                        .map(|pattern| (detail.key.clone(), pattern))
                })
                .collect(),
        }
    }

    fn detail_keys(&self, user_agent: &str) -> Vec<String> {
        self.user_agent_details
            .iter()
            .filter(|(_, pattern)| pattern.is_match(user_agent))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn collection(lists: &[IpListData]) -> IpListCollection {
    IpListCollection::new(
        lists
            .iter()
            .map(|list| NamedIpList::new(list.name(), &list.source, &list.description, &list.ips))
            .collect(),
    )
}

fn user_agent_pattern(name: &str, pattern: &str) -> Option<Regex> {
    if pattern.trim().is_empty() {
        return None;
    }
    match Regex::new(&format!("(?i){}", pattern)) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(list = name, error = %e, "skipping invalid user agent pattern");
            None
        }
    }
}

/// One complete, immutable view of the cloud configuration.
pub struct CloudConfigSnapshot {
    version: i64,
    block: BlockFlag,
    endpoints: HashMap<(String, String), Arc<EndpointPolicy>>,
    /// Keyed by declared method, `*` for any method.
    wildcards: HashMap<String, Vec<WildcardPolicy>>,
    blocked_user_ids: HashSet<String>,
    bypassed_ips: IpSet,
    lists: Arc<CompiledLists>,
}

impl Default for CloudConfigSnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            block: BlockFlag::Unknown,
            endpoints: HashMap::new(),
            wildcards: HashMap::new(),
            blocked_user_ids: HashSet::new(),
            bypassed_ips: IpSet::new(),
            lists: Arc::new(CompiledLists::default()),
        }
    }
}

impl CloudConfigSnapshot {
    /// Compile a document. Lists come from the document when present,
    /// otherwise `previous_lists` is reused as is.
    pub fn build(
        doc: &CloudConfigDocument,
        previous_lists: Option<Arc<CompiledLists>>,
        bounds: &RuleBounds,
    ) -> Self {
        let mut endpoints = HashMap::new();
        let mut wildcards: HashMap<String, Vec<WildcardPolicy>> = HashMap::new();

        for endpoint in &doc.endpoints {
            if endpoint.route.is_empty() {
                tracing::warn!(method = %endpoint.method, "skipping endpoint without route");
                continue;
            }
            let method = endpoint.method.to_ascii_uppercase();
            let policy = Arc::new(EndpointPolicy::compile(endpoint, &method, bounds));

            if is_wildcard_endpoint(&method, &endpoint.route) {
                match compile_route_pattern(&endpoint.route) {
                    Ok(pattern) => wildcards
                        .entry(method)
                        .or_default()
                        .push(WildcardPolicy { pattern, policy }),
                    Err(e) => tracing::warn!(
                        route = %endpoint.route,
                        error = %e,
                        "skipping endpoint with invalid wildcard route"
                    ),
                }
            } else {
                endpoints.insert((method, endpoint.route.clone()), policy);
            }
        }

        let lists = match (&doc.lists, previous_lists) {
            (Some(lists), _) => Arc::new(CompiledLists::compile(lists)),
            (None, Some(previous)) => previous,
            (None, None) => Arc::new(CompiledLists::default()),
        };

        Self {
            version: doc.config_updated_at,
            block: BlockFlag::from(doc.block),
            endpoints,
            wildcards,
            blocked_user_ids: doc.blocked_user_ids.iter().cloned().collect(),
            bypassed_ips: IpSet::from_entries(&doc.bypassed_ips),
            lists,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn block_flag(&self) -> BlockFlag {
        self.block
    }

    pub fn lists(&self) -> Arc<CompiledLists> {
        Arc::clone(&self.lists)
    }

    /// Exact `(method, route)` lookup.
    pub fn endpoint_policy(&self, method: &str, route: &str) -> Option<Arc<EndpointPolicy>> {
        self.endpoints
            .get(&(method.to_ascii_uppercase(), route.to_string()))
            .cloned()
    }

    /// Wildcard policies matching the request: the method's own bucket first,
    /// then the any-method bucket, each in configuration order.
    pub fn wildcard_policies(&self, method: &str, route: &str) -> Vec<Arc<EndpointPolicy>> {
        let method = method.to_ascii_uppercase();
        let mut buckets = vec![method.as_str()];
        if method != WILDCARD {
            buckets.push(WILDCARD);
        }
        buckets
            .into_iter()
            .filter_map(|bucket| self.wildcards.get(bucket))
            .flatten()
            .filter(|wildcard| wildcard.pattern.is_match(route))
            .map(|wildcard| Arc::clone(&wildcard.policy))
            .collect()
    }

    /// Exact match, else the first matching wildcard.
    pub fn resolve_endpoint(&self, method: &str, route: &str) -> Option<Arc<EndpointPolicy>> {
        if method.is_empty() || route.is_empty() {
            return None;
        }
        self.endpoint_policy(method, route)
            .or_else(|| self.wildcard_policies(method, route).into_iter().next())
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<EndpointPolicy>> {
        self.endpoints.values().chain(
            self.wildcards
                .values()
                .flatten()
                .map(|wildcard| &wildcard.policy),
        )
    }

    /// Rate-limit rules of every endpoint that has one.
    pub fn rate_limit_rules(&self) -> Vec<RateLimitRule> {
        self.endpoints()
            .filter_map(|policy| policy.rate_limit.clone())
            .collect()
    }

    pub fn is_user_blocked(&self, user_id: &str) -> bool {
        !user_id.is_empty() && self.blocked_user_ids.contains(user_id)
    }

    pub fn is_ip_bypassed(&self, ip: &str) -> bool {
        !ip.is_empty() && self.bypassed_ips.contains_str(ip)
    }

    pub fn blocked_ip_matches(&self, ip: &str) -> Vec<IpListMatch> {
        self.lists.blocked_ips.matches(ip)
    }

    /// First blocked list containing `ip`.
    pub fn is_ip_blocked(&self, ip: &str) -> Option<IpListMatch> {
        self.blocked_ip_matches(ip).into_iter().next()
    }

    /// `false` only when allow lists exist, the address is public and no
    /// list contains it.
    pub fn is_ip_allowed(&self, ip: &str) -> bool {
        if is_private_ip(ip) {
            return true;
        }
        self.lists.allowed_ips.lookup(ip).0 != ListLookup::NotFound
    }

    pub fn monitored_ip_matches(&self, ip: &str) -> Vec<IpListMatch> {
        self.lists.monitored_ips.matches(ip)
    }

    /// Detail keys naming why the agent is blocked, `None` when it is not.
    /// A match without any matching detail yields an empty list.
    pub fn is_user_agent_blocked(&self, user_agent: &str) -> Option<Vec<String>> {
        match &self.lists.blocked_user_agents {
            Some(pattern) if !user_agent.is_empty() && pattern.is_match(user_agent) => {
                Some(self.lists.detail_keys(user_agent))
            }
            _ => None,
        }
    }

    pub fn user_agent_monitored(&self, user_agent: &str) -> Option<Vec<String>> {
        match &self.lists.monitored_user_agents {
            Some(pattern) if !user_agent.is_empty() && pattern.is_match(user_agent) => {
                Some(self.lists.detail_keys(user_agent))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{RateLimitingConfig, UserAgentDetail};

    fn endpoint(method: &str, route: &str) -> EndpointConfig {
        EndpointConfig {
            method: method.into(),
            route: route.into(),
            ..Default::default()
        }
    }

    fn limited(method: &str, route: &str, max: u64, window_ms: u64) -> EndpointConfig {
        EndpointConfig {
            rate_limiting: RateLimitingConfig {
                enabled: true,
                max_requests: max,
                window_size_in_ms: window_ms,
            },
            ..endpoint(method, route)
        }
    }

    fn build(doc: CloudConfigDocument) -> CloudConfigSnapshot {
        CloudConfigSnapshot::build(&doc, None, &RuleBounds::default())
    }

    #[test]
    fn exact_and_wildcard_endpoints() {
        let snapshot = build(CloudConfigDocument {
            config_updated_at: 1,
            endpoints: vec![
                endpoint("post", "/login"),
                endpoint("GET", "/api/*"),
                endpoint("*", "/admin"),
            ],
            ..Default::default()
        });

        assert!(snapshot.endpoint_policy("POST", "/login").is_some());
        assert!(snapshot.endpoint_policy("GET", "/login").is_none());
        assert_eq!(snapshot.wildcard_policies("GET", "/api/users").len(), 1);
        assert!(snapshot.wildcard_policies("POST", "/api/users").is_empty());
        assert_eq!(snapshot.wildcard_policies("DELETE", "/admin").len(), 1);

        let resolved = snapshot.resolve_endpoint("GET", "/api/x/").unwrap();
        assert_eq!(resolved.route, "/api/*");
        assert!(snapshot.resolve_endpoint("", "/login").is_none());
    }

    #[test]
    fn invalid_window_drops_only_that_rate_limit() {
        let snapshot = build(CloudConfigDocument {
            config_updated_at: 1,
            endpoints: vec![
                limited("POST", "/login", 5, 60_000),
                limited("POST", "/signup", 5, 1_000),
            ],
            blocked_user_ids: vec!["u1".into()],
            ..Default::default()
        });

        let rules = snapshot.rate_limit_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].route, "/login");
        assert!(snapshot.endpoint_policy("POST", "/signup").is_some());
        assert!(snapshot.is_user_blocked("u1"));
    }

    #[test]
    fn disabled_rate_limit_yields_no_rule() {
        let mut config = limited("POST", "/login", 5, 60_000);
        config.rate_limiting.enabled = false;
        let snapshot = build(CloudConfigDocument {
            endpoints: vec![config],
            ..Default::default()
        });
        assert!(snapshot.rate_limit_rules().is_empty());
    }

    #[test]
    fn ip_lists_and_bypass() {
        let snapshot = build(CloudConfigDocument {
            bypassed_ips: vec!["9.9.9.9".into()],
            lists: Some(FirewallLists {
                blocked_ip_addresses: vec![IpListData {
                    key: "tor".into(),
                    description: "Tor exit nodes".into(),
                    ips: vec!["5.5.5.0/24".into()],
                    ..Default::default()
                }],
                allowed_ip_addresses: vec![IpListData {
                    key: "geo".into(),
                    ips: vec!["8.8.8.8".into()],
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        });

        assert!(snapshot.is_ip_bypassed("9.9.9.9"));
        assert!(!snapshot.is_ip_bypassed(""));
        assert_eq!(snapshot.is_ip_blocked("5.5.5.7").unwrap().description, "Tor exit nodes");
        assert!(snapshot.is_ip_blocked("5.5.6.1").is_none());

        assert!(snapshot.is_ip_allowed("8.8.8.8"));
        assert!(snapshot.is_ip_allowed("10.0.0.1"));
        assert!(!snapshot.is_ip_allowed("1.1.1.1"));
    }

    #[test]
    fn no_allow_lists_allows_everyone() {
        let snapshot = build(CloudConfigDocument::default());
        assert!(snapshot.is_ip_allowed("1.1.1.1"));
        assert_eq!(snapshot.block_flag(), BlockFlag::Unknown);
    }

    #[test]
    fn user_agent_patterns_are_case_insensitive() {
        let snapshot = build(CloudConfigDocument {
            lists: Some(FirewallLists {
                blocked_user_agents: "AI2Bot|Bytespider".into(),
                monitored_user_agents: "curl".into(),
                user_agent_details: vec![
                    UserAgentDetail {
                        key: "ai2".into(),
                        pattern: "AI2Bot".into(),
                    },
                    UserAgentDetail {
                        key: "bytedance".into(),
                        pattern: "Bytespider".into(),
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        });

        assert_eq!(
            snapshot.is_user_agent_blocked("Mozilla/5.0 (compatible) bytespider"),
            Some(vec!["bytedance".to_string()])
        );
        assert!(snapshot.is_user_agent_blocked("Mozilla/5.0").is_none());
        assert!(snapshot.is_user_agent_blocked("").is_none());
        assert!(snapshot.user_agent_monitored("curl/8.0").is_some());
    }

    #[test]
    fn invalid_user_agent_pattern_is_skipped() {
        let snapshot = build(CloudConfigDocument {
            lists: Some(FirewallLists {
                blocked_user_agents: "(unclosed".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(snapshot.is_user_agent_blocked("(unclosed").is_none());
    }

    #[test]
    fn lists_carry_over_when_absent() {
        let first = build(CloudConfigDocument {
            config_updated_at: 1,
            lists: Some(FirewallLists {
                blocked_user_agents: "badbot".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let second = CloudConfigSnapshot::build(
            &CloudConfigDocument {
                config_updated_at: 2,
                ..Default::default()
            },
            Some(first.lists()),
            &RuleBounds::default(),
        );
        assert!(second.is_user_agent_blocked("BadBot/1.0").is_some());
    }
}
