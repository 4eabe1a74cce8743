use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use rasp_common::{RaspError, RaspResult};

/// Prometheus metrics shared by every tenant of the daemon.
pub struct ProtectionMetrics {
    pub registry: Registry,
    pub decisions_total: IntCounter,
    pub blocked_total: IntCounterVec,
    pub rate_limit_fail_open: IntCounter,
    pub attack_waves_detected: IntCounter,
    pub config_applied: IntCounter,
    pub active_tenants: IntGauge,
}

fn metric_error(e: prometheus::Error) -> RaspError {
    RaspError::Other(anyhow::anyhow!("metrics: {}", e))
}

impl ProtectionMetrics {
    pub fn new() -> RaspResult<Self> {
        let registry = Registry::new();

        let decisions_total = IntCounter::with_opts(Opts::new(
            "rasp_decisions_total",
            "Total number of blocking decisions made",
        ))
        .map_err(metric_error)?;

        let blocked_total = IntCounterVec::new(
            Opts::new("rasp_blocked_total", "Blocked decisions by trigger"),
            &["trigger"],
        )
        .map_err(metric_error)?;

        let rate_limit_fail_open = IntCounter::with_opts(Opts::new(
            "rasp_rate_limit_fail_open_total",
            "Rate-limit queries that failed or timed out and were allowed",
        ))
        .map_err(metric_error)?;

        let attack_waves_detected = IntCounter::with_opts(Opts::new(
            "rasp_attack_waves_detected_total",
            "Total number of attack waves detected",
        ))
        .map_err(metric_error)?;

        let config_applied = IntCounter::with_opts(Opts::new(
            "rasp_cloud_config_applied_total",
            "Cloud config snapshots applied",
        ))
        .map_err(metric_error)?;

        let active_tenants = IntGauge::with_opts(Opts::new(
            "rasp_active_tenants",
            "Number of registered tenants",
        ))
        .map_err(metric_error)?;

        registry
            .register(Box::new(decisions_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(blocked_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(rate_limit_fail_open.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(attack_waves_detected.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(config_applied.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(active_tenants.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            decisions_total,
            blocked_total,
            rate_limit_fail_open,
            attack_waves_detected,
            config_applied,
            active_tenants,
        })
    }

    /// Text exposition format.
    pub fn encode_text(&self) -> RaspResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_error)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
