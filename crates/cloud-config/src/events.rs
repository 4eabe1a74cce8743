//! Detection events reported to the cloud.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rasp_common::RaspResult;
use serde::Serialize;

use crate::client::EventSink;
use crate::store::CloudConfigStore;

pub const ATTACK_WAVE_EVENT: &str = "detected_attack_wave";

pub const MAX_EVENTS_PER_INTERVAL: usize = 100;
pub const EVENT_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub ip_address: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventUser {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventAttack {
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<EventUser>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAgent {
    pub dry_mode: bool,
    pub hostname: String,
    pub version: String,
    pub library: String,
}

impl EventAgent {
    pub fn current(dry_mode: bool) -> Self {
        Self {
            dry_mode,
            hostname: std::env::var("HOSTNAME").unwrap_or_default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            library: "rasp-agent".to_string(),
        }
    }
}

/// Envelope posted to the events endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CloudEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub request: EventRequest,
    pub attack: EventAttack,
    pub agent: EventAgent,
    /// Unix time in milliseconds.
    pub time: i64,
}

impl CloudEvent {
    pub fn attack_wave(ip: &str, user_agent: &str, user_id: &str, dry_mode: bool) -> Self {
        Self {
            kind: ATTACK_WAVE_EVENT.to_string(),
            request: EventRequest {
                ip_address: ip.to_string(),
                user_agent: user_agent.to_string(),
            },
            attack: EventAttack {
                metadata: BTreeMap::new(),
                user: (!user_id.is_empty()).then(|| EventUser {
                    id: user_id.to_string(),
                }),
            },
            agent: EventAgent::current(dry_mode),
            time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Caps how many events leave the process per interval.
pub struct EventLimiter {
    max_events: usize,
    interval: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl EventLimiter {
    pub fn new(max_events: usize, interval: Duration) -> Self {
        Self {
            max_events,
            interval,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut sent = self.sent.lock();
        while let Some(oldest) = sent.front() {
            if now.saturating_duration_since(*oldest) >= self.interval {
                sent.pop_front();
            } else {
                break;
            }
        }
        if sent.len() >= self.max_events {
            return false;
        }
        sent.push_back(now);
        true
    }
}

impl Default for EventLimiter {
    fn default() -> Self {
        Self::new(MAX_EVENTS_PER_INTERVAL, EVENT_INTERVAL)
    }
}

/// Sends events through a sink and feeds piggy-backed configs to the store.
pub struct EventReporter {
    sink: Arc<dyn EventSink>,
    limiter: EventLimiter,
}

impl EventReporter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            limiter: EventLimiter::default(),
        }
    }

    pub fn with_limiter(sink: Arc<dyn EventSink>, limiter: EventLimiter) -> Self {
        Self { sink, limiter }
    }

    /// Returns whether the event was sent. Dropped events are not errors.
    pub async fn report(&self, event: &CloudEvent, store: &CloudConfigStore) -> RaspResult<bool> {
        if !self.limiter.try_acquire() {
            tracing::debug!(kind = %event.kind, "event limit reached, dropping event");
            return Ok(false);
        }
        if let Some(doc) = self.sink.send_event(event).await? {
            store.ingest_document(doc);
        }
        Ok(true)
    }
}
