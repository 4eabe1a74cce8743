pub mod health;
pub mod metrics;
pub mod protection;
pub mod tenants;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use rasp_protection::Tenant;
use serde_json::{json, Value};

use crate::state::SharedState;

/// Error response shared by the handlers.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

pub(crate) fn tenant(state: &SharedState, token: &str) -> Result<Arc<Tenant>, ApiError> {
    state
        .registry
        .lookup(token)
        .map_err(|e| error(StatusCode::NOT_FOUND, e))
}
