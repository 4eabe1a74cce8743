use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rasp_cloud_config::{CloudConfigSnapshot, CloudConfigStore};
use rasp_ip_lists::is_loopback;
use rasp_rate_limit::{RateLimitQuery, RateLimitTrigger};
use serde::Deserialize;

use crate::metrics::ProtectionMetrics;
use crate::oracle::RateLimitOracle;
use crate::verdict::{BlockAction, BlockHandling, Decision, MonitoredMatches};

/// Pre-request check as sent by the interception layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionRequest {
    pub user_id: String,
    pub method: String,
    pub route: String,
    pub ip: String,
    pub user_agent: String,
    pub rate_limit_group: String,
}

/// Ordered, short-circuiting blocking checks over one config snapshot.
///
/// The rate-limit step is the only one that may wait on another process. It
/// is bounded by `query_timeout`, and a timeout or error allows the request.
pub struct BlockingDecisionPipeline {
    config: Arc<CloudConfigStore>,
    oracle: Arc<dyn RateLimitOracle>,
    query_timeout: Duration,
    localhost_allowed_by_default: bool,
    metrics: Arc<ProtectionMetrics>,
}

impl BlockingDecisionPipeline {
    pub fn new(
        config: Arc<CloudConfigStore>,
        oracle: Arc<dyn RateLimitOracle>,
        query_timeout: Duration,
        localhost_allowed_by_default: bool,
        metrics: Arc<ProtectionMetrics>,
    ) -> Self {
        Self {
            config,
            oracle,
            query_timeout,
            localhost_allowed_by_default,
            metrics,
        }
    }

    pub async fn decide(&self, request: &DecisionRequest) -> Decision {
        self.metrics.decisions_total.inc();
        let decision = self.evaluate(request).await;

        if let Some(action) = decision.verdict.block_action() {
            self.metrics
                .blocked_total
                .with_label_values(&[action.trigger.as_str()])
                .inc();
            tracing::info!(
                trigger = %action.trigger,
                data = %action.data,
                description = %action.description,
                method = %request.method,
                route = %request.route,
                "request blocked"
            );
        } else {
            tracing::debug!(method = %request.method, route = %request.route, ip = %request.ip, "request allowed");
        }
        decision
    }

    async fn evaluate(&self, request: &DecisionRequest) -> Decision {
        // One snapshot for the whole decision.
        let snapshot = self.config.snapshot();
        let ip = request.ip.as_str();

        if snapshot.is_user_blocked(&request.user_id) {
            return Decision::block(BlockAction::blocked(
                BlockHandling::Store,
                "user",
                "user blocked from config",
                &request.user_id,
            ));
        }

        if !self.endpoint_allows_ip(&snapshot, request) {
            return Decision::block(BlockAction::blocked(
                BlockHandling::Exit,
                "ip",
                "not allowed by config to access this endpoint",
                ip,
            ));
        }

        if snapshot.is_ip_bypassed(ip) {
            tracing::debug!(ip, "ip bypassed, skipping remaining checks");
            return Decision::allow();
        }

        let mut monitored = MonitoredMatches {
            ip_lists: snapshot.monitored_ip_matches(ip),
            user_agents: Vec::new(),
        };

        if let Some(list) = snapshot.is_ip_blocked(ip) {
            return Decision::block(BlockAction::blocked(
                BlockHandling::Exit,
                "ip",
                &list.description,
                ip,
            ))
            .with_monitored(monitored);
        }

        if !snapshot.is_ip_allowed(ip) {
            return Decision::block(BlockAction::blocked(
                BlockHandling::Exit,
                "ip",
                "not in allowlist",
                ip,
            ))
            .with_monitored(monitored);
        }

        if let Some(keys) = snapshot.user_agent_monitored(&request.user_agent) {
            monitored.user_agents = keys;
        }
        if let Some(keys) = snapshot.is_user_agent_blocked(&request.user_agent) {
            let description = keys.first().map(String::as_str).unwrap_or("unknown");
            return Decision::block(BlockAction::blocked(
                BlockHandling::Exit,
                "user-agent",
                description,
                &request.user_agent,
            ))
            .with_monitored(monitored);
        }

        if let Some(action) = self.check_rate_limit(&snapshot, request).await {
            return Decision::block(action).with_monitored(monitored);
        }

        Decision::allow().with_monitored(monitored)
    }

    /// The exact endpoint decides when it has an allowlist, otherwise the
    /// first matching wildcard with one. Unparseable or empty addresses are
    /// not judged.
    fn endpoint_allows_ip(&self, snapshot: &CloudConfigSnapshot, request: &DecisionRequest) -> bool {
        if request.method.is_empty() || request.route.is_empty() {
            return true;
        }
        let Ok(addr) = request.ip.trim().parse::<IpAddr>() else {
            return true;
        };
        if self.localhost_allowed_by_default && is_loopback(&request.ip) {
            return true;
        }

        let exact = snapshot.endpoint_policy(&request.method, &request.route);
        let governing = exact
            .filter(|policy| policy.has_allowlist())
            .or_else(|| {
                snapshot
                    .wildcard_policies(&request.method, &request.route)
                    .into_iter()
                    .find(|policy| policy.has_allowlist())
            });

        match governing {
            Some(policy) => policy.allowed_ips.contains(addr),
            None => true,
        }
    }

    async fn check_rate_limit(
        &self,
        snapshot: &CloudConfigSnapshot,
        request: &DecisionRequest,
    ) -> Option<BlockAction> {
        if request.method.is_empty() || request.route.is_empty() {
            return None;
        }
        let limited = snapshot
            .endpoint_policy(&request.method, &request.route)
            .into_iter()
            .chain(snapshot.wildcard_policies(&request.method, &request.route))
            .any(|policy| policy.rate_limit.is_some());
        if !limited {
            return None;
        }

        let query = RateLimitQuery {
            method: request.method.clone(),
            route: request.route.clone(),
            user: request.user_id.clone(),
            ip: request.ip.clone(),
            rate_limit_group: request.rate_limit_group.clone(),
        };

        let status = match tokio::time::timeout(self.query_timeout, self.oracle.check(&query)).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                self.metrics.rate_limit_fail_open.inc();
                tracing::warn!(error = %e, "rate-limit query failed, allowing request");
                return None;
            }
            Err(_) => {
                self.metrics.rate_limit_fail_open.inc();
                tracing::warn!(
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "rate-limit query timed out, allowing request"
                );
                return None;
            }
        };

        let trigger = status.trigger.filter(|_| status.block)?;
        let data = match trigger {
            RateLimitTrigger::Group => &request.rate_limit_group,
            RateLimitTrigger::User => &request.user_id,
            RateLimitTrigger::Ip => &request.ip,
        };
        Some(BlockAction::rate_limited(trigger.as_str(), data))
    }
}
