use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RaspError, RaspResult};

/// Top-level daemon configuration.
///
/// Only bootstrap values live here. Protection state (endpoints, IP lists,
/// blocked users) always comes from the cloud and is never read from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cloud: CloudSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub attack_wave: AttackWaveSettings,
    #[serde(default)]
    pub tenants: TenantSettings,
    #[serde(default)]
    pub protection: ProtectionSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// When false, tenants never contact the cloud.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_config_endpoint")]
    pub config_endpoint: String,
    /// Bootstrap token; tenants can also register later through the API.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_endpoint(),
            config_endpoint: default_config_endpoint(),
            token: None,
            poll_interval_secs: default_poll_interval(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl CloudSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Duration of one sliding-window bucket; also the advance tick.
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,
    #[serde(default = "default_min_window_ms")]
    pub min_window_ms: u64,
    #[serde(default = "default_max_window_ms")]
    pub max_window_ms: u64,
    #[serde(default = "default_max_entries_per_dimension")]
    pub max_entries_per_dimension: usize,
    /// Budget for the rate-limit query on the request path.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Base URL of another daemon that owns the counters. Local engine when
    /// unset.
    #[serde(default)]
    pub oracle_url: Option<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            bucket_secs: default_bucket_secs(),
            min_window_ms: default_min_window_ms(),
            max_window_ms: default_max_window_ms(),
            max_entries_per_dimension: default_max_entries_per_dimension(),
            query_timeout_ms: default_query_timeout_ms(),
            oracle_url: None,
        }
    }
}

impl RateLimitSettings {
    pub fn bucket(&self) -> Duration {
        Duration::from_secs(self.bucket_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackWaveSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_attack_wave_threshold")]
    pub threshold: u64,
    #[serde(default = "default_attack_wave_window_buckets")]
    pub window_buckets: usize,
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,
    #[serde(default = "default_min_secs_between_events")]
    pub min_secs_between_events: u64,
    #[serde(default = "default_max_tracked_entries")]
    pub max_tracked_entries: usize,
}

impl Default for AttackWaveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_attack_wave_threshold(),
            window_buckets: default_attack_wave_window_buckets(),
            bucket_secs: default_bucket_secs(),
            min_secs_between_events: default_min_secs_between_events(),
            max_tracked_entries: default_max_tracked_entries(),
        }
    }
}

impl AttackWaveSettings {
    pub fn bucket(&self) -> Duration {
        Duration::from_secs(self.bucket_secs)
    }

    pub fn min_time_between_events(&self) -> Duration {
        Duration::from_secs(self.min_secs_between_events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default = "default_inactivity_grace")]
    pub inactivity_grace_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_task_stop_grace")]
    pub task_stop_grace_ms: u64,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            inactivity_grace_secs: default_inactivity_grace(),
            sweep_interval_secs: default_sweep_interval(),
            task_stop_grace_ms: default_task_stop_grace(),
        }
    }
}

impl TenantSettings {
    pub fn inactivity_grace(&self) -> Duration {
        Duration::from_secs(self.inactivity_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn task_stop_grace(&self) -> Duration {
        Duration::from_millis(self.task_stop_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionSettings {
    /// Loopback clients pass endpoint allowlists without being listed.
    #[serde(default = "default_true")]
    pub localhost_allowed_by_default: bool,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            localhost_allowed_by_default: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: true,
        }
    }
}

// Default value helpers
fn default_listen() -> String {
    "127.0.0.1:9797".to_string()
}
fn default_true() -> bool {
    true
}
fn default_endpoint() -> String {
    "https://guard.aikido.dev/".to_string()
}
fn default_config_endpoint() -> String {
    "https://runtime.aikido.dev/".to_string()
}
fn default_poll_interval() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    5_000
}
fn default_bucket_secs() -> u64 {
    60
}
fn default_min_window_ms() -> u64 {
    60_000
}
fn default_max_window_ms() -> u64 {
    3_600_000
}
fn default_max_entries_per_dimension() -> usize {
    100_000
}
fn default_query_timeout_ms() -> u64 {
    10
}
fn default_attack_wave_threshold() -> u64 {
    15
}
fn default_attack_wave_window_buckets() -> usize {
    1
}
fn default_min_secs_between_events() -> u64 {
    20 * 60
}
fn default_max_tracked_entries() -> usize {
    10_000
}
fn default_inactivity_grace() -> u64 {
    120
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_task_stop_grace() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> RaspResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML document.
    pub fn from_yaml(content: &str) -> RaspResult<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> RaspResult<()> {
        if self.server.listen.trim().is_empty() {
            return Err(RaspError::Config("server.listen must not be empty".into()));
        }
        if self.rate_limit.bucket_secs == 0 {
            return Err(RaspError::Config("rate_limit.bucket_secs must be > 0".into()));
        }
        if self.rate_limit.min_window_ms > self.rate_limit.max_window_ms {
            return Err(RaspError::Config(format!(
                "rate_limit.min_window_ms ({}) exceeds max_window_ms ({})",
                self.rate_limit.min_window_ms, self.rate_limit.max_window_ms
            )));
        }
        if self.rate_limit.max_entries_per_dimension == 0 {
            return Err(RaspError::Config(
                "rate_limit.max_entries_per_dimension must be > 0".into(),
            ));
        }
        if self.attack_wave.threshold == 0 {
            return Err(RaspError::Config("attack_wave.threshold must be > 0".into()));
        }
        if self.attack_wave.window_buckets == 0 || self.attack_wave.bucket_secs == 0 {
            return Err(RaspError::Config(
                "attack_wave window_buckets and bucket_secs must be > 0".into(),
            ));
        }
        if self.attack_wave.max_tracked_entries == 0 {
            return Err(RaspError::Config(
                "attack_wave.max_tracked_entries must be > 0".into(),
            ));
        }
        if self.cloud.poll_interval_secs == 0 {
            return Err(RaspError::Config("cloud.poll_interval_secs must be > 0".into()));
        }
        if self.tenants.sweep_interval_secs == 0 {
            return Err(RaspError::Config("tenants.sweep_interval_secs must be > 0".into()));
        }
        Ok(())
    }
}
