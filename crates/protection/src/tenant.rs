use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rasp_attack_wave::{is_web_scanner, AttackWaveDetector, DetectorConfig};
use rasp_cloud_config::{
    refresh, BlockFlag, CloudConfigStore, CloudEvent, ConfigSource, EndpointSummary,
    EventReporter, EventSink, RefreshOutcome,
};
use rasp_common::{token_fingerprint, AgentConfig};
use rasp_rate_limit::{RateLimitQuery, RateLimitStatus, RateLimitingEngine, RuleBounds};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::metrics::ProtectionMetrics;
use crate::oracle::{LocalRateLimitOracle, RateLimitOracle, RemoteRateLimitOracle};
use crate::pipeline::{BlockingDecisionPipeline, DecisionRequest};
use crate::tasks::BackgroundTask;
use crate::verdict::Decision;

/// Detection events waiting for upload. Events beyond this are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// A tenant's connection to the cloud backend.
#[derive(Clone)]
pub struct CloudLink {
    pub source: Arc<dyn ConfigSource>,
    pub events: Arc<dyn EventSink>,
}

/// Post-request report from the interception layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestReport {
    pub method: String,
    pub route: String,
    pub user: String,
    pub ip: String,
    pub rate_limit_group: String,
    pub user_agent: String,
    /// Caller's verdict. When absent the scanner heuristic runs on `path`
    /// (or `route`) and `query`.
    pub is_web_scanner: Option<bool>,
    pub path: String,
    pub query: HashMap<String, String>,
}

impl RequestReport {
    fn rate_limit_query(&self) -> RateLimitQuery {
        RateLimitQuery {
            method: self.method.clone(),
            route: self.route.clone(),
            user: self.user.clone(),
            ip: self.ip.clone(),
            rate_limit_group: self.rate_limit_group.clone(),
        }
    }

    fn looks_like_scanner(&self) -> bool {
        self.is_web_scanner.unwrap_or_else(|| {
            let path = if self.path.is_empty() {
                &self.route
            } else {
                &self.path
            };
            is_web_scanner(&self.method, path, &self.query)
        })
    }
}

#[derive(Default)]
struct TenantStats {
    requests: AtomicU64,
    blocked: AtomicU64,
    attack_waves: AtomicU64,
    monitored_ips: DashMap<String, u64>,
    monitored_user_agents: DashMap<String, u64>,
}

impl TenantStats {
    fn record(&self, decision: &Decision) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if decision.is_block() {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
        for list in &decision.monitored.ip_lists {
            *self.monitored_ips.entry(list.key.clone()).or_insert(0) += 1;
        }
        for key in &decision.monitored.user_agents {
            *self.monitored_user_agents.entry(key.clone()).or_insert(0) += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatsSnapshot {
    pub requests: u64,
    pub blocked: u64,
    pub attack_waves: u64,
    pub monitored_ips: BTreeMap<String, u64>,
    pub monitored_user_agents: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub version: i64,
    pub block_flag: BlockFlag,
    pub endpoints: Vec<EndpointSummary>,
}

/// All protection state of one tenant. Nothing here is shared with other
/// tenants, and each structure has its own lock.
pub struct Tenant {
    token: String,
    fingerprint: String,
    config: Arc<CloudConfigStore>,
    rate_limits: Arc<RateLimitingEngine>,
    attack_waves: Arc<AttackWaveDetector>,
    pipeline: BlockingDecisionPipeline,
    cloud: Option<CloudLink>,
    reporter: Option<Arc<EventReporter>>,
    events: Option<mpsc::Sender<CloudEvent>>,
    event_queue: Mutex<Option<mpsc::Receiver<CloudEvent>>>,
    attack_wave_enabled: bool,
    stats: TenantStats,
    metrics: Arc<ProtectionMetrics>,
    last_activity: Mutex<Instant>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl Tenant {
    pub fn new(
        token: &str,
        settings: &AgentConfig,
        metrics: Arc<ProtectionMetrics>,
        cloud: Option<CloudLink>,
    ) -> Self {
        let fingerprint = token_fingerprint(token);
        let rate_limits = Arc::new(RateLimitingEngine::new(
            settings.rate_limit.max_entries_per_dimension,
        ));

        let config = {
            let engine = Arc::clone(&rate_limits);
            let applied = metrics.config_applied.clone();
            let fingerprint = fingerprint.clone();
            Arc::new(
                CloudConfigStore::new(RuleBounds::from(&settings.rate_limit)).with_apply_hook(
                    Box::new(move |snapshot| {
                        let installed = engine.apply_config(snapshot.rate_limit_rules());
                        applied.inc();
                        tracing::info!(
                            token = %fingerprint,
                            version = snapshot.version(),
                            rules = installed,
                            "rate-limit rules updated"
                        );
                    }),
                ),
            )
        };

        let oracle = rate_limit_oracle(token, &fingerprint, settings, &rate_limits);
        let pipeline = BlockingDecisionPipeline::new(
            Arc::clone(&config),
            oracle,
            settings.rate_limit.query_timeout(),
            settings.protection.localhost_allowed_by_default,
            Arc::clone(&metrics),
        );

        let reporter = cloud
            .as_ref()
            .map(|link| Arc::new(EventReporter::new(Arc::clone(&link.events))));
        let (events, event_queue) = match reporter {
            Some(_) => {
                let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        Self {
            token: token.to_string(),
            fingerprint,
            config,
            rate_limits,
            attack_waves: Arc::new(AttackWaveDetector::new(DetectorConfig::from(
                &settings.attack_wave,
            ))),
            pipeline,
            cloud,
            reporter,
            events,
            event_queue: Mutex::new(event_queue),
            attack_wave_enabled: settings.attack_wave.enabled,
            stats: TenantStats::default(),
            metrics,
            last_activity: Mutex::new(Instant::now()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Loggable stand-in for the token.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn config(&self) -> &Arc<CloudConfigStore> {
        &self.config
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitingEngine> {
        &self.rate_limits
    }

    pub fn attack_waves(&self) -> &Arc<AttackWaveDetector> {
        &self.attack_waves
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub async fn decide(&self, request: &DecisionRequest) -> Decision {
        self.touch();
        let decision = self.pipeline.decide(request).await;
        self.stats.record(&decision);
        decision
    }

    pub fn check_rate_limit(&self, query: &RateLimitQuery) -> RateLimitStatus {
        self.touch();
        self.rate_limits.check_threshold(query)
    }

    /// Count the finished request and run attack-wave detection when it was
    /// scanner-shaped. Returns whether a new wave was detected.
    pub fn record_request(&self, report: &RequestReport) -> bool {
        self.touch();
        self.rate_limits.record_hit(&report.rate_limit_query());
        if !report.looks_like_scanner() {
            return false;
        }
        self.signal_attack_wave(&report.ip, &report.user_agent, &report.user)
    }

    /// One scanner-shaped request from `ip`.
    pub fn signal_attack_wave(&self, ip: &str, user_agent: &str, user_id: &str) -> bool {
        self.touch();
        if !self.attack_wave_enabled || !self.attack_waves.record_and_check(ip) {
            return false;
        }

        self.stats.attack_waves.fetch_add(1, Ordering::Relaxed);
        self.metrics.attack_waves_detected.inc();
        tracing::info!(token = %self.fingerprint, ip, "attack wave detected");

        let dry_mode = self.config.block_flag() != BlockFlag::On;
        self.report_event(CloudEvent::attack_wave(ip, user_agent, user_id, dry_mode));
        true
    }

    /// Queue the event for the upload task. Never waits on the cloud.
    fn report_event(&self, event: CloudEvent) {
        let Some(events) = &self.events else {
            return;
        };
        match events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(token = %self.fingerprint, kind = %event.kind, "event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(token = %self.fingerprint, kind = %event.kind, "tenant stopped, event not reported");
            }
        }
    }

    /// Events queued but not yet picked up by the upload task.
    pub fn pending_events(&self) -> usize {
        self.events
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Run one refresh cycle now. Without a cloud link this does nothing.
    pub async fn refresh_config(&self) -> Option<RefreshOutcome> {
        let link = self.cloud.as_ref()?;
        match refresh(&self.config, link.source.as_ref()).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(token = %self.fingerprint, error = %e, "cloud config refresh failed");
                None
            }
        }
    }

    /// Start the window-advance tasks and, with a cloud link, the event
    /// upload task and a config refresh that runs once right away.
    pub fn start_tasks(&self, settings: &AgentConfig) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let engine = Arc::clone(&self.rate_limits);
        tasks.push(BackgroundTask::periodic(
            "rate-limit-advance",
            settings.rate_limit.bucket(),
            move || {
                let engine = Arc::clone(&engine);
                async move {
                    let dropped = engine.advance_all();
                    if dropped > 0 {
                        tracing::debug!(dropped, "dropped idle rate-limit counters");
                    }
                }
            },
        ));

        let detector = Arc::clone(&self.attack_waves);
        tasks.push(BackgroundTask::periodic(
            "attack-wave-advance",
            settings.attack_wave.bucket(),
            move || {
                let detector = Arc::clone(&detector);
                async move {
                    detector.advance();
                }
            },
        ));

        if let Some(link) = &self.cloud {
            let store = Arc::clone(&self.config);
            let source = Arc::clone(&link.source);
            let fingerprint = self.fingerprint.clone();
            let run = move || {
                let store = Arc::clone(&store);
                let source = Arc::clone(&source);
                let fingerprint = fingerprint.clone();
                async move {
                    if let Err(e) = refresh(&store, source.as_ref()).await {
                        tracing::warn!(token = %fingerprint, error = %e, "cloud config refresh failed");
                    }
                }
            };
            tasks.push(BackgroundTask::periodic_now(
                "config-refresh",
                settings.cloud.poll_interval(),
                run,
            ));
        }

        let queue = self.event_queue.lock().take();
        if let (Some(reporter), Some(queue)) = (self.reporter.clone(), queue) {
            let store = Arc::clone(&self.config);
            let fingerprint = self.fingerprint.clone();
            tasks.push(BackgroundTask::consumer("event-upload", queue, move |event: CloudEvent| {
                let reporter = Arc::clone(&reporter);
                let store = Arc::clone(&store);
                let fingerprint = fingerprint.clone();
                async move {
                    if let Err(e) = reporter.report(&event, &store).await {
                        tracing::warn!(token = %fingerprint, error = %e, "failed to report event");
                    }
                }
            }));
        }

        tracing::debug!(token = %self.fingerprint, tasks = tasks.len(), "tenant tasks started");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Stop every task, each bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let tasks: Vec<BackgroundTask> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.stop(grace).await;
        }
        tracing::info!(token = %self.fingerprint, "tenant stopped");
    }

    pub fn config_view(&self) -> ConfigView {
        let snapshot = self.config.snapshot();
        let mut endpoints: Vec<EndpointSummary> =
            snapshot.endpoints().map(|p| EndpointSummary::from(p.as_ref())).collect();
        endpoints.sort_by(|a, b| (&a.route, &a.method).cmp(&(&b.route, &b.method)));
        ConfigView {
            version: snapshot.version(),
            block_flag: snapshot.block_flag(),
            endpoints,
        }
    }

    pub fn stats(&self) -> TenantStatsSnapshot {
        let collect = |map: &DashMap<String, u64>| {
            map.iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect::<BTreeMap<_, _>>()
        };
        TenantStatsSnapshot {
            requests: self.stats.requests.load(Ordering::Relaxed),
            blocked: self.stats.blocked.load(Ordering::Relaxed),
            attack_waves: self.stats.attack_waves.load(Ordering::Relaxed),
            monitored_ips: collect(&self.stats.monitored_ips),
            monitored_user_agents: collect(&self.stats.monitored_user_agents),
        }
    }
}

fn rate_limit_oracle(
    token: &str,
    fingerprint: &str,
    settings: &AgentConfig,
    engine: &Arc<RateLimitingEngine>,
) -> Arc<dyn RateLimitOracle> {
    if let Some(url) = settings.rate_limit.oracle_url.as_deref() {
        match RemoteRateLimitOracle::new(url, token, settings.rate_limit.query_timeout()) {
            Ok(remote) => return Arc::new(remote),
            Err(e) => tracing::warn!(
                token = %fingerprint,
                error = %e,
                "remote rate-limit oracle unavailable, using local engine"
            ),
        }
    }
    Arc::new(LocalRateLimitOracle::new(Arc::clone(engine)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use async_trait::async_trait;
    use rasp_cloud_config::{CloudConfigDocument, EndpointConfig, FirewallLists, RateLimitingConfig};
    use rasp_common::{RaspError, RaspResult};

    /// Announces a newer config after `delay`.
    struct SlowSource {
        delay: Duration,
        version: i64,
        version_calls: AtomicUsize,
    }

    #[async_trait]
    impl ConfigSource for SlowSource {
        async fn fetch_version(&self) -> RaspResult<i64> {
            self.version_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.version)
        }

        async fn fetch_config(&self) -> RaspResult<CloudConfigDocument> {
            Ok(CloudConfigDocument {
                config_updated_at: self.version,
                ..Default::default()
            })
        }

        async fn fetch_lists(&self) -> RaspResult<FirewallLists> {
            Err(RaspError::Transport("lists unavailable".into()))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        async fn send_event(&self, _event: &CloudEvent) -> RaspResult<Option<CloudConfigDocument>> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn linked_tenant(settings: &AgentConfig, source: Arc<SlowSource>, sink: Arc<CountingSink>) -> Tenant {
        Tenant::new(
            "token",
            settings,
            Arc::new(ProtectionMetrics::new().unwrap()),
            Some(CloudLink { source, events: sink }),
        )
    }

    fn tenant() -> Tenant {
        Tenant::new(
            "token",
            &AgentConfig::default(),
            Arc::new(ProtectionMetrics::new().unwrap()),
            None,
        )
    }

    #[test]
    fn applied_config_installs_rate_limit_rules() {
        let tenant = tenant();
        tenant.config().ingest_document(CloudConfigDocument {
            config_updated_at: 1,
            endpoints: vec![EndpointConfig {
                method: "POST".into(),
                route: "/login".into(),
                rate_limiting: RateLimitingConfig {
                    enabled: true,
                    max_requests: 3,
                    window_size_in_ms: 60_000,
                },
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(tenant.rate_limits().rule_count(), 1);

        let view = tenant.config_view();
        assert_eq!(view.version, 1);
        assert_eq!(view.endpoints[0].max_requests, Some(3));
    }

    #[test]
    fn report_runs_scanner_heuristic_when_flag_absent() {
        let mut settings = AgentConfig::default();
        settings.attack_wave.threshold = 2;
        let tenant = Tenant::new(
            "token",
            &settings,
            Arc::new(ProtectionMetrics::new().unwrap()),
            None,
        );

        let report = RequestReport {
            method: "GET".into(),
            path: "/.env".into(),
            ip: "1.2.3.4".into(),
            ..Default::default()
        };
        assert!(!tenant.record_request(&report));
        assert!(tenant.record_request(&report));
        assert_eq!(tenant.stats().attack_waves, 1);

        let benign = RequestReport {
            method: "GET".into(),
            route: "/home".into(),
            ip: "5.6.7.8".into(),
            ..Default::default()
        };
        assert!(!tenant.record_request(&benign));
        assert!(!tenant.attack_waves().is_tracked("5.6.7.8"));
    }

    #[test]
    fn disabled_detection_never_fires() {
        let mut settings = AgentConfig::default();
        settings.attack_wave.enabled = false;
        settings.attack_wave.threshold = 1;
        let tenant = Tenant::new(
            "token",
            &settings,
            Arc::new(ProtectionMetrics::new().unwrap()),
            None,
        );
        assert!(!tenant.signal_attack_wave("1.2.3.4", "", ""));
    }

    #[test]
    fn fingerprint_hides_token() {
        let tenant = tenant();
        assert_ne!(tenant.fingerprint(), tenant.token());
        assert!(!tenant.fingerprint().contains("token"));
    }

    #[tokio::test]
    async fn tasks_start_once_and_stop() {
        let tenant = tenant();
        let settings = AgentConfig::default();
        tenant.start_tasks(&settings);
        tenant.start_tasks(&settings);
        assert_eq!(tenant.task_count(), 2);

        tenant.shutdown(Duration::from_millis(100)).await;
        assert_eq!(tenant.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_in_flight_refresh() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(10),
            version: 99,
            version_calls: AtomicUsize::new(0),
        });
        let tenant = linked_tenant(&AgentConfig::default(), Arc::clone(&source), Arc::default());
        let before = tenant.config().version();

        tenant.start_tasks(&AgentConfig::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.version_calls.load(Ordering::SeqCst), 1);

        tenant.shutdown(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(tenant.config().version(), before);
        assert_eq!(source.version_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_queue_is_bounded() {
        let mut settings = AgentConfig::default();
        settings.attack_wave.threshold = 1;
        let source = Arc::new(SlowSource {
            delay: Duration::ZERO,
            version: 0,
            version_calls: AtomicUsize::new(0),
        });
        let tenant = linked_tenant(&settings, source, Arc::default());

        for i in 0..EVENT_QUEUE_CAPACITY + 20 {
            assert!(tenant.signal_attack_wave(&format!("10.0.{}.{}", i / 256, i % 256), "", ""));
        }
        assert_eq!(tenant.pending_events(), EVENT_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn queued_events_are_uploaded_once_started() {
        let mut settings = AgentConfig::default();
        settings.attack_wave.threshold = 1;
        let source = Arc::new(SlowSource {
            delay: Duration::ZERO,
            version: 0,
            version_calls: AtomicUsize::new(0),
        });
        let sink = Arc::new(CountingSink::default());
        let tenant = linked_tenant(&settings, source, Arc::clone(&sink));

        assert!(tenant.signal_attack_wave("1.2.3.4", "nikto", ""));
        assert_eq!(tenant.pending_events(), 1);
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);

        tenant.start_tasks(&settings);
        assert_eq!(tenant.task_count(), 4);
        for _ in 0..100 {
            if sink.sent.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
        assert_eq!(tenant.pending_events(), 0);

        tenant.shutdown(Duration::from_secs(1)).await;
        // Detection still works once the upload task is gone.
        assert!(tenant.signal_attack_wave("5.6.7.8", "", ""));
    }
}
