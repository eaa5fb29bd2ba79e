use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use super::api_error;
use crate::interfaces::web::AppState;

pub async fn list(State(state): State<AppState>) -> Response {
    Json(json!({"approvals": state.ctx.approvals.all()})).into_response()
}

/// Resolve an approval from the dashboard. Body: `{"action": "approve"}` or
/// `{"action": "reject"}`, optional `"resolver"` identity.
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("malformed body: {}", e)),
    };
    let approve = match parsed.get("action").and_then(|v| v.as_str()) {
        Some("approve") => true,
        Some("reject") => false,
        _ => return api_error(StatusCode::BAD_REQUEST, "action must be approve or reject"),
    };
    let resolver = parsed
        .get("resolver")
        .and_then(|v| v.as_str())
        .unwrap_or("dashboard");

    if state.ctx.approvals.get(&id).is_none() {
        return api_error(StatusCode::NOT_FOUND, "approval not found");
    }
    match state.ctx.approvals.resolve(&id, approve, resolver) {
        Ok(request) => Json(json!({"approval": request})).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
