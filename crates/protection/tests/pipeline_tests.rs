use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rasp_cloud_config::{
    CloudConfigDocument, CloudConfigStore, EndpointConfig, FirewallLists, IpListData,
    RateLimitingConfig, UserAgentDetail,
};
use rasp_common::{AgentConfig, RaspError, RaspResult};
use rasp_protection::{
    BlockHandling, BlockKind, BlockingDecisionPipeline, DecisionRequest, ProtectionMetrics,
    RateLimitOracle, RequestReport, Tenant, Verdict,
};
use rasp_rate_limit::{RateLimitQuery, RateLimitStatus, RateLimitTrigger};

/// Answers with a fixed status and counts calls.
struct FixedOracle {
    status: RateLimitStatus,
    calls: AtomicUsize,
}

impl FixedOracle {
    fn new(status: RateLimitStatus) -> Arc<Self> {
        Arc::new(Self {
            status,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RateLimitOracle for FixedOracle {
    async fn check(&self, _query: &RateLimitQuery) -> RaspResult<RateLimitStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

/// Would block, but never answers in time.
struct SlowOracle;

#[async_trait]
impl RateLimitOracle for SlowOracle {
    async fn check(&self, _query: &RateLimitQuery) -> RaspResult<RateLimitStatus> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(RateLimitStatus::blocked(RateLimitTrigger::Ip))
    }
}

struct FailingOracle;

#[async_trait]
impl RateLimitOracle for FailingOracle {
    async fn check(&self, _query: &RateLimitQuery) -> RaspResult<RateLimitStatus> {
        Err(RaspError::Transport("connection reset".into()))
    }
}

fn ip_list(key: &str, description: &str, ips: &[&str]) -> IpListData {
    IpListData {
        key: key.into(),
        description: description.into(),
        ips: ips.iter().map(|ip| ip.to_string()).collect(),
        ..Default::default()
    }
}

fn rate_limited_login() -> EndpointConfig {
    EndpointConfig {
        method: "POST".into(),
        route: "/login".into(),
        rate_limiting: RateLimitingConfig {
            enabled: true,
            max_requests: 5,
            window_size_in_ms: 60_000,
        },
        ..Default::default()
    }
}

fn pipeline_with(
    doc: CloudConfigDocument,
    oracle: Arc<dyn RateLimitOracle>,
    localhost_allowed: bool,
) -> (BlockingDecisionPipeline, Arc<ProtectionMetrics>) {
    let store = Arc::new(CloudConfigStore::default());
    store.ingest_document(CloudConfigDocument {
        config_updated_at: 1,
        ..doc
    });
    let metrics = Arc::new(ProtectionMetrics::new().unwrap());
    let pipeline = BlockingDecisionPipeline::new(
        store,
        oracle,
        Duration::from_millis(10),
        localhost_allowed,
        Arc::clone(&metrics),
    );
    (pipeline, metrics)
}

fn pipeline(doc: CloudConfigDocument) -> BlockingDecisionPipeline {
    pipeline_with(doc, FixedOracle::new(RateLimitStatus::allow()), true).0
}

fn request(method: &str, route: &str, ip: &str) -> DecisionRequest {
    DecisionRequest {
        method: method.into(),
        route: route.into(),
        ip: ip.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bypassed_ip_wins_over_block_list() {
    let pipeline = pipeline(CloudConfigDocument {
        bypassed_ips: vec!["5.5.5.5".into()],
        lists: Some(FirewallLists {
            blocked_ip_addresses: vec![ip_list("tor", "Tor exit nodes", &["5.5.5.0/24"])],
            ..Default::default()
        }),
        ..Default::default()
    });

    let bypassed = pipeline.decide(&request("GET", "/", "5.5.5.5")).await;
    assert_eq!(bypassed.verdict, Verdict::Allow);

    let neighbour = pipeline.decide(&request("GET", "/", "5.5.5.6")).await;
    let action = neighbour.verdict.block_action().unwrap();
    assert_eq!(action.trigger, "ip");
    assert_eq!(action.description, "Tor exit nodes");
    assert_eq!(action.action, BlockHandling::Exit);
}

#[tokio::test]
async fn test_blocked_user_comes_first() {
    let pipeline = pipeline(CloudConfigDocument {
        blocked_user_ids: vec!["mallory".into()],
        bypassed_ips: vec!["1.1.1.1".into()],
        ..Default::default()
    });

    let decision = pipeline
        .decide(&DecisionRequest {
            user_id: "mallory".into(),
            ..request("GET", "/", "1.1.1.1")
        })
        .await;
    let action = decision.verdict.block_action().unwrap();
    assert_eq!(action.trigger, "user");
    assert_eq!(action.action, BlockHandling::Store);
    assert_eq!(action.data, "mallory");
    assert_eq!(action.response_code, 403);
}

#[tokio::test]
async fn test_endpoint_allowlist() {
    let doc = CloudConfigDocument {
        endpoints: vec![EndpointConfig {
            method: "GET".into(),
            route: "/admin/*".into(),
            allowed_ip_addresses: vec!["10.0.0.0/8".into(), "2001:db8::/32".into()],
            ..Default::default()
        }],
        bypassed_ips: vec!["8.8.8.8".into()],
        ..Default::default()
    };
    let pipeline = pipeline(doc.clone());

    assert!(!pipeline.decide(&request("GET", "/admin/users", "10.1.2.3")).await.is_block());
    assert!(!pipeline.decide(&request("GET", "/admin/users", "2001:db8::5")).await.is_block());
    assert!(!pipeline.decide(&request("GET", "/public", "9.9.9.9")).await.is_block());

    // The endpoint allowlist is checked before the bypass list.
    let outsider = pipeline.decide(&request("GET", "/admin/users", "8.8.8.8")).await;
    assert_eq!(
        outsider.verdict.block_action().unwrap().description,
        "not allowed by config to access this endpoint"
    );

    assert!(!pipeline.decide(&request("GET", "/admin/users", "127.0.0.1")).await.is_block());
    let (strict, _) = pipeline_with(doc, FixedOracle::new(RateLimitStatus::allow()), false);
    assert!(strict.decide(&request("GET", "/admin/users", "127.0.0.1")).await.is_block());
}

#[tokio::test]
async fn test_global_allowlist_spares_private_addresses() {
    let pipeline = pipeline(CloudConfigDocument {
        lists: Some(FirewallLists {
            allowed_ip_addresses: vec![ip_list("geo", "Allowed countries", &["81.0.0.0/8"])],
            ..Default::default()
        }),
        ..Default::default()
    });

    assert!(!pipeline.decide(&request("GET", "/", "81.2.3.4")).await.is_block());
    assert!(!pipeline.decide(&request("GET", "/", "192.168.1.10")).await.is_block());

    let foreign = pipeline.decide(&request("GET", "/", "1.2.3.4")).await;
    assert_eq!(foreign.verdict.block_action().unwrap().description, "not in allowlist");
}

#[tokio::test]
async fn test_monitored_lists_never_block() {
    let pipeline = pipeline(CloudConfigDocument {
        lists: Some(FirewallLists {
            monitored_ip_addresses: vec![ip_list("vpn", "VPN ranges", &["4.4.4.0/24"])],
            monitored_user_agents: "curl".into(),
            user_agent_details: vec![UserAgentDetail {
                key: "curl".into(),
                pattern: "curl".into(),
            }],
            ..Default::default()
        }),
        ..Default::default()
    });

    let decision = pipeline
        .decide(&DecisionRequest {
            user_agent: "curl/8.4".into(),
            ..request("GET", "/", "4.4.4.4")
        })
        .await;
    assert_eq!(decision.verdict, Verdict::Allow);
    assert_eq!(decision.monitored.ip_lists[0].key, "vpn");
    assert_eq!(decision.monitored.user_agents, vec!["curl".to_string()]);
}

#[tokio::test]
async fn test_blocked_user_agent() {
    let pipeline = pipeline(CloudConfigDocument {
        lists: Some(FirewallLists {
            blocked_user_agents: "GPTBot|Scrapy".into(),
            user_agent_details: vec![UserAgentDetail {
                key: "openai".into(),
                pattern: "GPTBot".into(),
            }],
            ..Default::default()
        }),
        ..Default::default()
    });

    let named = pipeline
        .decide(&DecisionRequest {
            user_agent: "Mozilla/5.0 GPTBot/1.0".into(),
            ..request("GET", "/", "1.2.3.4")
        })
        .await;
    let action = named.verdict.block_action().unwrap();
    assert_eq!(action.trigger, "user-agent");
    assert_eq!(action.description, "openai");

    let unnamed = pipeline
        .decide(&DecisionRequest {
            user_agent: "scrapy/2.11".into(),
            ..request("GET", "/", "1.2.3.4")
        })
        .await;
    assert_eq!(unnamed.verdict.block_action().unwrap().description, "unknown");
}

#[tokio::test]
async fn test_rate_limit_verdict_is_429() {
    let oracle = FixedOracle::new(RateLimitStatus::blocked(RateLimitTrigger::User));
    let (pipeline, metrics) = pipeline_with(
        CloudConfigDocument {
            endpoints: vec![rate_limited_login()],
            ..Default::default()
        },
        oracle.clone(),
        true,
    );

    let decision = pipeline
        .decide(&DecisionRequest {
            user_id: "alice".into(),
            ..request("POST", "/login", "1.2.3.4")
        })
        .await;
    let action = decision.verdict.block_action().unwrap();
    assert_eq!(action.kind, BlockKind::Ratelimited);
    assert_eq!(action.trigger, "user");
    assert_eq!(action.data, "alice");
    assert_eq!(action.response_code, 429);
    assert_eq!(metrics.blocked_total.with_label_values(&["user"]).get(), 1);

    // Unconfigured endpoints and incomplete requests never reach the oracle.
    assert!(!pipeline.decide(&request("GET", "/login", "1.2.3.4")).await.is_block());
    assert!(!pipeline.decide(&request("", "/login", "1.2.3.4")).await.is_block());
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_rate_limit_query_fails_open() {
    let (pipeline, metrics) = pipeline_with(
        CloudConfigDocument {
            endpoints: vec![rate_limited_login()],
            ..Default::default()
        },
        Arc::new(SlowOracle),
        true,
    );

    let decision = pipeline.decide(&request("POST", "/login", "1.2.3.4")).await;
    assert_eq!(decision.verdict, Verdict::Allow);
    assert_eq!(metrics.rate_limit_fail_open.get(), 1);
}

#[tokio::test]
async fn test_failed_rate_limit_query_fails_open() {
    let (pipeline, metrics) = pipeline_with(
        CloudConfigDocument {
            endpoints: vec![rate_limited_login()],
            ..Default::default()
        },
        Arc::new(FailingOracle),
        true,
    );

    assert!(!pipeline.decide(&request("POST", "/login", "1.2.3.4")).await.is_block());
    assert_eq!(metrics.rate_limit_fail_open.get(), 1);
}

#[tokio::test]
async fn test_sixth_login_is_rate_limited_end_to_end() {
    let tenant = Tenant::new(
        "tenant-token",
        &AgentConfig::default(),
        Arc::new(ProtectionMetrics::new().unwrap()),
        None,
    );
    tenant.config().ingest_document(CloudConfigDocument {
        config_updated_at: 1,
        endpoints: vec![rate_limited_login()],
        ..Default::default()
    });

    let report = RequestReport {
        method: "POST".into(),
        route: "/login".into(),
        ip: "1.2.3.4".into(),
        is_web_scanner: Some(false),
        ..Default::default()
    };
    let check = request("POST", "/login", "1.2.3.4");

    for _ in 0..5 {
        assert!(!tenant.decide(&check).await.is_block());
        tenant.record_request(&report);
    }
    let decision = tenant.decide(&check).await;
    let action = decision.verdict.block_action().unwrap();
    assert_eq!(action.kind, BlockKind::Ratelimited);
    assert_eq!(action.trigger, "ip");

    // Another client is unaffected.
    assert!(!tenant.decide(&request("POST", "/login", "5.6.7.8")).await.is_block());

    let stats = tenant.stats();
    assert_eq!(stats.requests, 7);
    assert_eq!(stats.blocked, 1);
}

#[tokio::test]
async fn test_config_update_keeps_unchanged_rule_counters() {
    let tenant = Tenant::new(
        "tenant-token",
        &AgentConfig::default(),
        Arc::new(ProtectionMetrics::new().unwrap()),
        None,
    );
    let doc = |version| CloudConfigDocument {
        config_updated_at: version,
        endpoints: vec![rate_limited_login()],
        ..Default::default()
    };
    tenant.config().ingest_document(doc(1));

    let report = RequestReport {
        method: "POST".into(),
        route: "/login".into(),
        ip: "1.2.3.4".into(),
        is_web_scanner: Some(false),
        ..Default::default()
    };
    for _ in 0..5 {
        tenant.record_request(&report);
    }

    // Same rule in a newer snapshot: history survives.
    tenant.config().ingest_document(doc(2));
    assert!(tenant.decide(&request("POST", "/login", "1.2.3.4")).await.is_block());

    // A stale snapshot is ignored entirely.
    tenant.config().ingest_document(CloudConfigDocument {
        config_updated_at: 1,
        ..Default::default()
    });
    assert_eq!(tenant.config().version(), 2);
    assert_eq!(tenant.rate_limits().rule_count(), 1);
}
