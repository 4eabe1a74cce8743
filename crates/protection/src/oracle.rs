//! Where the pipeline asks "is this request over its rate limit".
//!
//! In a single daemon the answer is an in-memory call; when the counters live
//! in another process it is an HTTP round trip. Both sit behind the same
//! trait so the pipeline does not care, and both are bounded by the
//! pipeline's timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rasp_common::{RaspError, RaspResult};
use rasp_rate_limit::{RateLimitQuery, RateLimitStatus, RateLimitingEngine};
use serde::Serialize;

#[async_trait]
pub trait RateLimitOracle: Send + Sync {
    async fn check(&self, query: &RateLimitQuery) -> RaspResult<RateLimitStatus>;
}

/// Answers from the tenant's own engine.
pub struct LocalRateLimitOracle {
    engine: Arc<RateLimitingEngine>,
}

impl LocalRateLimitOracle {
    pub fn new(engine: Arc<RateLimitingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl RateLimitOracle for LocalRateLimitOracle {
    async fn check(&self, query: &RateLimitQuery) -> RaspResult<RateLimitStatus> {
        Ok(self.engine.check_threshold(query))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteQuery<'a> {
    token: &'a str,
    #[serde(flatten)]
    query: &'a RateLimitQuery,
}

/// Asks another daemon's `/api/v1/rate-limit` endpoint.
pub struct RemoteRateLimitOracle {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl RemoteRateLimitOracle {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> RaspResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RaspError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/api/v1/rate-limit", base_url.trim_end_matches('/')),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl RateLimitOracle for RemoteRateLimitOracle {
    async fn check(&self, query: &RateLimitQuery) -> RaspResult<RateLimitStatus> {
        let response = self
            .client
            .post(&self.url)
            .json(&RemoteQuery {
                token: &self.token,
                query,
            })
            .send()
            .await
            .map_err(|e| RaspError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RaspError::Transport(format!(
                "rate-limit query returned status {}",
                response.status()
            )));
        }
        response
            .json::<RateLimitStatus>()
            .await
            .map_err(|e| RaspError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasp_rate_limit::{RateLimitRule, RateLimitTrigger};

    #[tokio::test]
    async fn local_oracle_reads_engine() {
        let engine = Arc::new(RateLimitingEngine::default());
        engine.apply_config(vec![RateLimitRule {
            method: "GET".into(),
            route: "/".into(),
            max_requests: 1,
            window_buckets: 1,
        }]);
        let query = RateLimitQuery {
            method: "GET".into(),
            route: "/".into(),
            ip: "1.1.1.1".into(),
            ..Default::default()
        };
        let oracle = LocalRateLimitOracle::new(Arc::clone(&engine));

        assert!(!oracle.check(&query).await.unwrap().block);
        engine.record_hit(&query);
        let status = oracle.check(&query).await.unwrap();
        assert_eq!(status, RateLimitStatus::blocked(RateLimitTrigger::Ip));
    }

    #[test]
    fn remote_query_is_flat() {
        let query = RateLimitQuery {
            method: "POST".into(),
            route: "/login".into(),
            rate_limit_group: "team".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(RemoteQuery {
            token: "t",
            query: &query,
        })
        .unwrap();
        assert_eq!(json["token"], "t");
        assert_eq!(json["method"], "POST");
        assert_eq!(json["rateLimitGroup"], "team");
    }
}
