use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rasp_common::AttackWaveSettings;
use rasp_rate_limit::SlidingWindowCounter;

use crate::scanner::is_web_scanner;

/// Detection parameters.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Scanner-shaped requests inside the window that make a wave.
    pub threshold: u64,
    pub window_buckets: usize,
    pub bucket: Duration,
    pub min_time_between_events: Duration,
    pub max_tracked_entries: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from(&AttackWaveSettings::default())
    }
}

impl From<&AttackWaveSettings> for DetectorConfig {
    fn from(settings: &AttackWaveSettings) -> Self {
        Self {
            threshold: settings.threshold.max(1),
            window_buckets: settings.window_buckets.max(1),
            bucket: settings.bucket(),
            min_time_between_events: settings.min_time_between_events(),
            max_tracked_entries: settings.max_tracked_entries.max(1),
        }
    }
}

impl DetectorConfig {
    fn window_duration(&self) -> Duration {
        let buckets = u32::try_from(self.window_buckets).unwrap_or(u32::MAX);
        self.bucket.saturating_mul(buckets)
    }
}

/// Everything tracked for one source IP. The throttle timestamp lives next to
/// the window, so it can never outlive the IP's entry.
#[derive(Debug, Clone)]
struct AttackWaveEntry {
    window: SlidingWindowCounter,
    last_seen: Instant,
    last_event_sent: Option<Instant>,
}

/// Per-tenant detector for bursts of scanner traffic from a single IP.
pub struct AttackWaveDetector {
    config: DetectorConfig,
    entries: Mutex<HashMap<String, AttackWaveEntry>>,
}

impl AttackWaveDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(config.max_tracked_entries.min(1024))),
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run the scanner heuristic, then count the request if it qualifies.
    /// The heuristic runs before any lock is taken.
    pub fn check(
        &self,
        ip: &str,
        method: &str,
        path: &str,
        query: &HashMap<String, String>,
    ) -> bool {
        if ip.is_empty() || !is_web_scanner(method, path, query) {
            return false;
        }
        self.record_and_check(ip)
    }

    /// Count one scanner-shaped request from `ip`. Returns `true` exactly when
    /// a new wave should be reported.
    pub fn record_and_check(&self, ip: &str) -> bool {
        self.record_and_check_at(ip, Instant::now())
    }

    pub fn record_and_check_at(&self, ip: &str, now: Instant) -> bool {
        if ip.is_empty() {
            return false;
        }

        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(ip) {
            if let Some(sent) = entry.last_event_sent {
                if now.saturating_duration_since(sent) < self.config.min_time_between_events {
                    entry.last_seen = now;
                    return false;
                }
            }
        } else {
            if entries.len() >= self.config.max_tracked_entries {
                evict_least_recently_seen(&mut entries);
            }
            entries.insert(
                ip.to_string(),
                AttackWaveEntry {
                    window: SlidingWindowCounter::new(self.config.window_buckets),
                    last_seen: now,
                    last_event_sent: None,
                },
            );
        }

        let Some(entry) = entries.get_mut(ip) else {
            return false;
        };
        entry.window.increment();
        entry.last_seen = now;

        if entry.window.total() < self.config.threshold {
            return false;
        }

        entry.last_event_sent = Some(now);
        tracing::info!(
            ip,
            count = entry.window.total(),
            threshold = self.config.threshold,
            "attack wave detected"
        );
        true
    }

    /// Age every window by one bucket and sweep idle entries.
    pub fn advance(&self) -> usize {
        self.advance_at(Instant::now())
    }

    /// Entries are dropped once their window is empty and they have not been
    /// seen for a full window. Expired throttles are cleared.
    pub fn advance_at(&self, now: Instant) -> usize {
        let cutoff = now.checked_sub(self.config.window_duration());
        let min_between = self.config.min_time_between_events;

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_ip, entry| {
            entry.window.advance();
            if let Some(sent) = entry.last_event_sent {
                if now.saturating_duration_since(sent) > min_between {
                    entry.last_event_sent = None;
                }
            }
            let stale = cutoff.map_or(false, |cutoff| entry.last_seen < cutoff);
            !(entry.window.is_empty() && stale)
        });
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "swept idle attack wave entries");
        }
        removed
    }

    pub fn tracked_len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_tracked(&self, ip: &str) -> bool {
        self.entries.lock().contains_key(ip)
    }

    /// Current window total for `ip` (zero when untracked).
    pub fn count(&self, ip: &str) -> u64 {
        self.entries
            .lock()
            .get(ip)
            .map(|entry| entry.window.total())
            .unwrap_or(0)
    }
}

impl Default for AttackWaveDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

/// O(n) scan; only runs when the table is full.
fn evict_least_recently_seen(entries: &mut HashMap<String, AttackWaveEntry>) {
    let victim = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_seen)
        .map(|(ip, _)| ip.clone());
    if let Some(ip) = victim {
        entries.remove(&ip);
        tracing::debug!(ip = %ip, "evicted least recently seen attack wave entry");
    }
}
