use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rasp_common::RaspError;
use rasp_protection::{ConfigView, TenantStatsSnapshot};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error, tenant, ApiError};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub token: String,
}

/// POST /api/v1/tenants
///
/// Creates the tenant and starts its background tasks. Registering a known
/// token returns the existing tenant.
pub async fn register_tenant(
    State(state): State<SharedState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let tenant = state.registry.register(&body.token).map_err(|e| match e {
        RaspError::Config(_) => error(StatusCode::BAD_REQUEST, e),
        _ => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    })?;

    Ok(Json(json!({
        "status": "registered",
        "tenant": tenant.fingerprint(),
        "configVersion": tenant.config().version()
    })))
}

/// DELETE /api/v1/tenants/{token}
pub async fn remove_tenant(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.registry.remove(&token).await {
        return Err(error(StatusCode::NOT_FOUND, "unknown tenant"));
    }
    Ok(Json(json!({ "status": "removed" })))
}

/// GET /api/v1/config/{token}
pub async fn get_config(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<Json<ConfigView>, ApiError> {
    Ok(Json(tenant(&state, &token)?.config_view()))
}

/// GET /api/v1/stats/{token}
pub async fn get_stats(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<Json<TenantStatsSnapshot>, ApiError> {
    Ok(Json(tenant(&state, &token)?.stats()))
}
