use axum::extract::State;
use axum::Json;
use rasp_protection::{Decision, DecisionRequest, RequestReport, Verdict};
use rasp_rate_limit::{RateLimitQuery, RateLimitStatus};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{tenant, ApiError};
use crate::state::SharedState;

/// Request body carrying the tenant token next to the payload fields.
#[derive(Debug, Deserialize)]
pub struct Tokened<T> {
    #[serde(default)]
    pub token: String,
    #[serde(flatten)]
    pub body: T,
}

/// POST /api/v1/decide
///
/// Unknown tenants are allowed through; a missing config never blocks.
pub async fn decide(
    State(state): State<SharedState>,
    Json(request): Json<Tokened<DecisionRequest>>,
) -> Json<Value> {
    let Some(tenant) = state.registry.get(&request.token) else {
        tracing::debug!("decision for unknown tenant, allowing");
        return Json(json!({ "action": "allow" }));
    };
    let decision = tenant.decide(&request.body).await;
    Json(decision_body(&decision))
}

fn decision_body(decision: &Decision) -> Value {
    let mut body = match &decision.verdict {
        Verdict::Allow => json!({ "action": "allow" }),
        Verdict::Block(action) => {
            serde_json::to_value(action).unwrap_or_else(|_| json!({ "action": "allow" }))
        }
    };
    if !decision.monitored.is_empty() {
        body["monitored"] = json!(decision.monitored);
    }
    body
}

/// POST /api/v1/rate-limit
pub async fn check_rate_limit(
    State(state): State<SharedState>,
    Json(request): Json<Tokened<RateLimitQuery>>,
) -> Result<Json<RateLimitStatus>, ApiError> {
    let tenant = tenant(&state, &request.token)?;
    Ok(Json(tenant.check_rate_limit(&request.body)))
}

/// POST /api/v1/requests
///
/// Post-request report: counts the hit and feeds attack-wave detection.
pub async fn report_request(
    State(state): State<SharedState>,
    Json(request): Json<Tokened<RequestReport>>,
) -> Result<Json<Value>, ApiError> {
    let tenant = tenant(&state, &request.token)?;
    let attack_wave = tenant.record_request(&request.body);
    Ok(Json(json!({ "attackWave": attack_wave })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttackWaveSignal {
    pub ip: String,
    pub user_agent: String,
    pub user_id: String,
}

/// POST /api/v1/attack-wave
pub async fn signal_attack_wave(
    State(state): State<SharedState>,
    Json(request): Json<Tokened<AttackWaveSignal>>,
) -> Result<Json<Value>, ApiError> {
    let tenant = tenant(&state, &request.token)?;
    let signal = &request.body;
    let detected = tenant.signal_attack_wave(&signal.ip, &signal.user_agent, &signal.user_id);
    Ok(Json(json!({ "detected": detected })))
}
