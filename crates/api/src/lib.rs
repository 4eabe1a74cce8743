//! Local HTTP API used by the interception layer.

pub mod routes;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use rasp_protection::TenantRegistry;
use tokio::net::TcpListener;

pub use state::{ApiState, SharedState};

/// Build the Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/metrics", get(routes::metrics::get_metrics))
        // Tenant lifecycle
        .route("/api/v1/tenants", post(routes::tenants::register_tenant))
        .route("/api/v1/tenants/{token}", delete(routes::tenants::remove_tenant))
        // Request-time checks
        .route("/api/v1/decide", post(routes::protection::decide))
        .route("/api/v1/rate-limit", post(routes::protection::check_rate_limit))
        .route("/api/v1/requests", post(routes::protection::report_request))
        .route("/api/v1/attack-wave", post(routes::protection::signal_attack_wave))
        // Introspection
        .route("/api/v1/config/{token}", get(routes::tenants::get_config))
        .route("/api/v1/stats/{token}", get(routes::tenants::get_stats))
        .with_state(state)
}

/// Serve the API on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: SharedState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Start the API server on the specified address.
///
/// Returns once `shutdown` resolves and in-flight requests have finished.
pub async fn run_api_server<F>(state: SharedState, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("local API listening on {}", listen_addr);
    serve(listener, state, shutdown).await
}

pub fn new_shared_state(registry: Arc<TenantRegistry>) -> SharedState {
    Arc::new(ApiState::new(registry))
}
