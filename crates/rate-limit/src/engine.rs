use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rasp_common::{compile_route_pattern, is_wildcard_route, WILDCARD};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rule::{RateLimitRule, RateLimitTrigger, RuleState};

/// One request as seen by the rate limiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitQuery {
    pub method: String,
    pub route: String,
    pub user: String,
    pub ip: String,
    pub rate_limit_group: String,
}

/// Result of a threshold check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub block: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<RateLimitTrigger>,
}

impl RateLimitStatus {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn blocked(trigger: RateLimitTrigger) -> Self {
        Self {
            block: true,
            trigger: Some(trigger),
        }
    }
}

struct WildcardRule {
    pattern: Regex,
    state: Arc<RuleState>,
}

#[derive(Default)]
struct RuleTable {
    /// Keyed by `(METHOD, route)`; the method may be `*`.
    exact: HashMap<(String, String), Arc<RuleState>>,
    /// Routes containing `*`, most restrictive first.
    wildcard: Vec<WildcardRule>,
}

impl RuleTable {
    fn find(&self, rule: &RateLimitRule) -> Option<Arc<RuleState>> {
        if is_wildcard_route(&rule.route) {
            self.wildcard
                .iter()
                .find(|w| w.state.rule() == rule)
                .map(|w| Arc::clone(&w.state))
        } else {
            self.exact
                .get(&(rule.method.clone(), rule.route.clone()))
                .filter(|state| state.rule() == rule)
                .cloned()
        }
    }
}

/// Per-tenant table of rate-limit rules and their counters.
///
/// The rule table sits behind a read-mostly lock that is only held long enough
/// to collect the applicable rules; counters live in per-rule concurrent maps
/// so hits on different endpoints never contend.
pub struct RateLimitingEngine {
    table: RwLock<RuleTable>,
    max_entries_per_dimension: usize,
}

impl RateLimitingEngine {
    pub fn new(max_entries_per_dimension: usize) -> Self {
        Self {
            table: RwLock::new(RuleTable::default()),
            max_entries_per_dimension,
        }
    }

    /// Replace the whole rule table.
    ///
    /// Rules whose method, route, limit and window are unchanged keep their
    /// counters; everything else starts from zero. Returns the number of rules
    /// installed.
    pub fn apply_config(&self, rules: Vec<RateLimitRule>) -> usize {
        let previous = self.table.read();
        let mut next = RuleTable::default();
        let mut kept = 0usize;

        for mut rule in rules {
            rule.method = rule.method.to_ascii_uppercase();
            let state = match previous.find(&rule) {
                Some(state) => {
                    kept += 1;
                    state
                }
                None => Arc::new(RuleState::new(rule.clone(), self.max_entries_per_dimension)),
            };

            if is_wildcard_route(&rule.route) {
                match compile_route_pattern(&rule.route) {
                    Ok(pattern) => next.wildcard.push(WildcardRule { pattern, state }),
                    Err(e) => {
                        tracing::warn!(
                            method = %rule.method,
                            route = %rule.route,
                            error = %e,
                            "skipping rate limit with uncompilable route"
                        );
                    }
                }
            } else {
                next.exact.insert((rule.method.clone(), rule.route.clone()), state);
            }
        }
        drop(previous);

        next.wildcard.sort_by(|a, b| {
            a.state
                .rule()
                .rate()
                .total_cmp(&b.state.rule().rate())
                .then_with(|| a.state.rule().max_requests.cmp(&b.state.rule().max_requests))
        });

        let installed = next.exact.len() + next.wildcard.len();
        *self.table.write() = next;

        tracing::debug!(installed, kept, "applied rate limit rules");
        installed
    }

    /// Rules that apply to `method route`, in priority order: exact match,
    /// any-method exact route, then wildcard routes.
    pub fn applicable_rules(&self, method: &str, route: &str) -> Vec<Arc<RuleState>> {
        let method = method.to_ascii_uppercase();
        let table = self.table.read();
        let mut rules = Vec::new();

        if let Some(state) = table.exact.get(&(method.clone(), route.to_string())) {
            rules.push(Arc::clone(state));
        }
        if method != WILDCARD {
            if let Some(state) = table.exact.get(&(WILDCARD.to_string(), route.to_string())) {
                rules.push(Arc::clone(state));
            }
        }
        for wildcard in &table.wildcard {
            let rule_method = &wildcard.state.rule().method;
            if (rule_method == WILDCARD || *rule_method == method)
                && wildcard.pattern.is_match(route)
            {
                rules.push(Arc::clone(&wildcard.state));
            }
        }
        rules
    }

    /// Count one request against every applicable rule.
    pub fn record_hit(&self, query: &RateLimitQuery) {
        for state in self.applicable_rules(&query.method, &query.route) {
            state.record(&query.user, &query.ip, &query.rate_limit_group);
        }
    }

    /// Check the request against the applicable rules; the first rule whose
    /// relevant counter has reached its limit decides.
    pub fn check_threshold(&self, query: &RateLimitQuery) -> RateLimitStatus {
        for state in self.applicable_rules(&query.method, &query.route) {
            if let Some(trigger) =
                state.exceeded(&query.user, &query.ip, &query.rate_limit_group)
            {
                tracing::debug!(
                    method = %state.rule().method,
                    route = %state.rule().route,
                    trigger = trigger.as_str(),
                    "rate limit reached"
                );
                return RateLimitStatus::blocked(trigger);
            }
        }
        RateLimitStatus::allow()
    }

    /// Advance every counter by one bucket and drop empty ones.
    pub fn advance_all(&self) -> usize {
        let states: Vec<Arc<RuleState>> = {
            let table = self.table.read();
            table
                .exact
                .values()
                .cloned()
                .chain(table.wildcard.iter().map(|w| Arc::clone(&w.state)))
                .collect()
        };
        states.iter().map(|state| state.advance()).sum()
    }

    /// Installed rules, exact ones first.
    pub fn rules(&self) -> Vec<RateLimitRule> {
        let table = self.table.read();
        let mut rules: Vec<RateLimitRule> =
            table.exact.values().map(|s| s.rule().clone()).collect();
        rules.sort_by(|a, b| (&a.route, &a.method).cmp(&(&b.route, &b.method)));
        rules.extend(table.wildcard.iter().map(|w| w.state.rule().clone()));
        rules
    }

    pub fn rule_count(&self) -> usize {
        let table = self.table.read();
        table.exact.len() + table.wildcard.len()
    }
}

impl Default for RateLimitingEngine {
    fn default() -> Self {
        Self::new(100_000)
    }
}
