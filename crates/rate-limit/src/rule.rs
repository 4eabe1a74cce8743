use std::time::Duration;

use dashmap::DashMap;
use rasp_common::{RaspError, RaspResult, RateLimitSettings};
use serde::{Deserialize, Serialize};

use crate::sliding_window::{advance_windows, SlidingWindowCounter};

/// Entries inspected when choosing a counter to evict.
const EVICTION_SAMPLE: usize = 32;

/// Limits a single configured endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub method: String,
    pub route: String,
    pub max_requests: u64,
    pub window_buckets: usize,
}

/// Global bounds a rule must respect to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleBounds {
    pub min_window: Duration,
    pub max_window: Duration,
    /// Duration of one bucket; windows are expressed as a bucket count.
    pub bucket: Duration,
}

impl Default for RuleBounds {
    fn default() -> Self {
        Self {
            min_window: Duration::from_millis(60_000),
            max_window: Duration::from_millis(3_600_000),
            bucket: Duration::from_secs(60),
        }
    }
}

impl From<&RateLimitSettings> for RuleBounds {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            min_window: Duration::from_millis(settings.min_window_ms),
            max_window: Duration::from_millis(settings.max_window_ms),
            bucket: settings.bucket(),
        }
    }
}

impl RateLimitRule {
    /// Build a rule from cloud values, rejecting out-of-range windows and
    /// empty limits instead of clamping them.
    pub fn validated(
        method: &str,
        route: &str,
        max_requests: u64,
        window_ms: u64,
        bounds: &RuleBounds,
    ) -> RaspResult<Self> {
        let invalid = |reason: String| RaspError::InvalidRateLimit {
            method: method.to_string(),
            route: route.to_string(),
            reason,
        };

        if max_requests == 0 {
            return Err(invalid("maxRequests must be greater than zero".into()));
        }
        let window = Duration::from_millis(window_ms);
        if window < bounds.min_window || window > bounds.max_window {
            return Err(invalid(format!(
                "windowSizeInMS {} outside [{}, {}]",
                window_ms,
                bounds.min_window.as_millis(),
                bounds.max_window.as_millis()
            )));
        }
        let bucket_ms = bounds.bucket.as_millis().max(1);
        let window_buckets = (u128::from(window_ms) / bucket_ms).max(1) as usize;

        Ok(Self {
            method: method.to_string(),
            route: route.to_string(),
            max_requests,
            window_buckets,
        })
    }

    /// Requests allowed per bucket; lower means more restrictive.
    pub fn rate(&self) -> f64 {
        self.max_requests as f64 / self.window_buckets.max(1) as f64
    }
}

/// Identity dimension that tripped a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitTrigger {
    Group,
    User,
    Ip,
}

impl RateLimitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::User => "user",
            Self::Ip => "ip",
        }
    }
}

/// Counter state for one rule: three independent identity dimensions.
#[derive(Debug)]
pub struct RuleState {
    rule: RateLimitRule,
    by_user: DashMap<String, SlidingWindowCounter>,
    by_ip: DashMap<String, SlidingWindowCounter>,
    by_group: DashMap<String, SlidingWindowCounter>,
    max_entries: usize,
}

impl RuleState {
    pub fn new(rule: RateLimitRule, max_entries: usize) -> Self {
        Self {
            rule,
            by_user: DashMap::new(),
            by_ip: DashMap::new(),
            by_group: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Count one request for each non-empty identity.
    pub fn record(&self, user: &str, ip: &str, group: &str) {
        self.increment(&self.by_user, user);
        self.increment(&self.by_ip, ip);
        self.increment(&self.by_group, group);
    }

    /// Check the highest-priority identity only: group, then user, then IP.
    pub fn exceeded(&self, user: &str, ip: &str, group: &str) -> Option<RateLimitTrigger> {
        let (map, key, trigger) = if !group.is_empty() {
            (&self.by_group, group, RateLimitTrigger::Group)
        } else if !user.is_empty() {
            (&self.by_user, user, RateLimitTrigger::User)
        } else if !ip.is_empty() {
            (&self.by_ip, ip, RateLimitTrigger::Ip)
        } else {
            return None;
        };

        let count = map.get(key).map(|w| w.total()).unwrap_or(0);
        (count >= self.rule.max_requests).then_some(trigger)
    }

    /// Current count for an identity in one dimension (absent means zero).
    pub fn count(&self, trigger: RateLimitTrigger, key: &str) -> u64 {
        let map = match trigger {
            RateLimitTrigger::Group => &self.by_group,
            RateLimitTrigger::User => &self.by_user,
            RateLimitTrigger::Ip => &self.by_ip,
        };
        map.get(key).map(|w| w.total()).unwrap_or(0)
    }

    /// Advance every counter and drop the ones that emptied out.
    pub fn advance(&self) -> usize {
        advance_windows(&self.by_user) + advance_windows(&self.by_ip) + advance_windows(&self.by_group)
    }

    /// Number of tracked identities across all dimensions.
    pub fn tracked(&self) -> usize {
        self.by_user.len() + self.by_ip.len() + self.by_group.len()
    }

    fn increment(&self, map: &DashMap<String, SlidingWindowCounter>, key: &str) {
        if key.is_empty() {
            return;
        }
        if let Some(mut window) = map.get_mut(key) {
            window.increment();
            return;
        }
        map.entry(key.to_string())
            .or_insert_with(|| SlidingWindowCounter::new(self.rule.window_buckets))
            .increment();

        // Concurrent inserts can overshoot, so the bound is enforced after
        // inserting rather than checked before.
        while map.len() > self.max_entries {
            if !evict_sampled(map, key) {
                break;
            }
        }
    }
}

/// Remove the entry with the lowest running total among a bounded sample,
/// never `keep`. Heavy hitters are the ones worth keeping under cardinality
/// pressure.
fn evict_sampled(map: &DashMap<String, SlidingWindowCounter>, keep: &str) -> bool {
    let victim = map
        .iter()
        .filter(|entry| entry.key() != keep)
        .take(EVICTION_SAMPLE)
        .min_by_key(|entry| entry.value().total())
        .map(|entry| entry.key().clone());
    let Some(key) = victim else {
        return false;
    };
    map.remove(&key);
    tracing::debug!(key = %key, "evicted rate limit counter at capacity");
    true
}
