use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use super::api_error;
use crate::interfaces::web::AppState;

pub async fn get_settings(State(state): State<AppState>) -> Response {
    match serde_json::to_value(state.ctx.settings.get()) {
        Ok(mut value) => {
            // Credentials never leave through the read endpoint.
            if let Some(integrations) = value.get_mut("integrations") {
                *integrations = redact(integrations);
            }
            Json(value).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let sensitive = k.contains("token")
                        || k.contains("password")
                        || k.contains("secret");
                    let redacted = if sensitive && v.as_str().map(|s| !s.is_empty()).unwrap_or(false)
                    {
                        Value::String("•••".to_string())
                    } else {
                        redact(v)
                    };
                    (k.clone(), redacted)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Patch runtime settings. Body: `{"patch": {...}, "confirmations": [...]}`
/// or a bare patch object. Dangerous pairs without a valid confirmation are
/// reported back, not applied.
pub async fn patch_settings(State(state): State<AppState>, body: String) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("malformed body: {}", e)),
    };
    let (patch, confirmations) = match (parsed.get("patch"), parsed.get("confirmations")) {
        (Some(patch), confirmations) => (
            patch.clone(),
            confirmations
                .and_then(|c| c.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
        ),
        (None, _) => (parsed, Vec::new()),
    };
    if !patch.is_object() {
        return api_error(StatusCode::BAD_REQUEST, "patch must be an object");
    }

    match state.ctx.settings.update(&patch, &confirmations) {
        Ok(outcome) => Json(json!({
            "applied": outcome.applied,
            "requires_confirmation": outcome.requires_confirmation,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::BAD_REQUEST, e),
    }
}

/// Obtain the one-time confirmation token for a dangerous `(key, value)`.
pub async fn confirm_token(State(state): State<AppState>, body: String) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("malformed body: {}", e)),
    };
    let Some(key) = parsed.get("key").and_then(|v| v.as_str()) else {
        return api_error(StatusCode::BAD_REQUEST, "missing 'key'");
    };
    let Some(value) = parsed.get("value") else {
        return api_error(StatusCode::BAD_REQUEST, "missing 'value'");
    };
    match crate::security::confirm::dangerous_reason(key, value) {
        Some(reason) => Json(json!({
            "token": state.ctx.settings.confirmation_token(key, value),
            "reason": reason,
        }))
        .into_response(),
        None => api_error(
            StatusCode::BAD_REQUEST,
            "this key/value pair does not require confirmation",
        ),
    }
}
