use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::state::SharedState;

/// GET /api/metrics
///
/// Prometheus text exposition of the protection counters.
pub async fn get_metrics(State(state): State<SharedState>) -> impl IntoResponse {
    match state.registry.metrics().encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            tracing::error!("failed to encode prometheus metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                format!("failed to encode metrics: {}", e),
            )
        }
    }
}
