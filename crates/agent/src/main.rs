mod config;

use std::sync::Arc;

use anyhow::Result;
use rasp_common::{AgentConfig, LogConfig};
use rasp_protection::{connector_for, BackgroundTask, ProtectionMetrics, TenantRegistry};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/rasp-agent.yaml".to_string());

    let config = config::load(&config_path)?;
    init_tracing(&config.log);
    info!(config_path = %config_path, listen = %config.server.listen, "starting RASP agent");

    let config = Arc::new(config);
    let metrics = Arc::new(ProtectionMetrics::new()?);
    let registry = Arc::new(TenantRegistry::new(
        Arc::clone(&config),
        connector_for(&config.cloud),
        metrics,
    ));

    if let Some(token) = config.cloud.token.as_deref() {
        registry.register(token)?;
    }

    let sweeper = spawn_sweeper(Arc::clone(&registry), &config);

    let state = rasp_api::new_shared_state(Arc::clone(&registry));
    if let Err(e) = rasp_api::run_api_server(state, &config.server.listen, shutdown_signal()).await {
        error!(error = %e, "local API server error");
    }

    info!("shutting down");
    sweeper.stop(config.tenants.task_stop_grace()).await;
    registry.shutdown_all().await;
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    if log.json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

/// Periodically drop tenants that stopped sending requests.
fn spawn_sweeper(registry: Arc<TenantRegistry>, config: &AgentConfig) -> BackgroundTask {
    let grace = config.tenants.inactivity_grace();
    BackgroundTask::periodic("tenant-sweep", config.tenants.sweep_interval(), move || {
        let registry = Arc::clone(&registry);
        async move {
            let removed = registry.sweep_inactive(grace).await;
            if removed > 0 {
                info!(removed, remaining = registry.len(), "inactive tenants removed");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
