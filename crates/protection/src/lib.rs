//! Request-time protection: the blocking decision pipeline and the per-tenant
//! state it runs against.
//!
//! A [`TenantRegistry`] owns one [`Tenant`] per token. Each tenant holds its
//! own config store, rate-limiting engine and attack-wave detector, and runs
//! periodic tasks to age windows and refresh cloud config.

pub mod metrics;
pub mod oracle;
pub mod pipeline;
pub mod registry;
pub mod tasks;
pub mod tenant;
pub mod verdict;

pub use metrics::ProtectionMetrics;
pub use oracle::{LocalRateLimitOracle, RateLimitOracle, RemoteRateLimitOracle};
pub use pipeline::{BlockingDecisionPipeline, DecisionRequest};
pub use registry::{
    connector_for, CloudConnector, HttpCloudConnector, OfflineConnector, TenantRegistry,
};
pub use tasks::BackgroundTask;
pub use tenant::{CloudLink, EVENT_QUEUE_CAPACITY, ConfigView, RequestReport, Tenant, TenantStatsSnapshot};
pub use verdict::{BlockAction, BlockHandling, BlockKind, Decision, MonitoredMatches, Verdict};
