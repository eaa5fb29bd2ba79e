use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::api_error;
use crate::interfaces::web::AppState;

pub async fn list(State(state): State<AppState>) -> Response {
    Json(json!({"triggers": state.ctx.triggers.list()})).into_response()
}

pub async fn toggle(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ctx.triggers.toggle(&id) {
        Ok(enabled) => Json(json!({"id": id, "enabled": enabled})).into_response(),
        Err(e) => api_error(StatusCode::NOT_FOUND, e),
    }
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ctx.triggers.delete(&id) {
        Ok(true) => Json(json!({"deleted": true})).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "trigger not found"),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
