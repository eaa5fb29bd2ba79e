use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::api_error;
use crate::core::cost::CostConfig;
use crate::interfaces::web::AppState;

pub async fn today(State(state): State<AppState>) -> Response {
    Json(json!({"today": state.ctx.cost.today()})).into_response()
}

pub async fn history(State(state): State<AppState>) -> Response {
    Json(json!({"history": state.ctx.cost.history()})).into_response()
}

pub async fn get_config(State(state): State<AppState>) -> Response {
    Json(json!({"config": state.ctx.cost.config()})).into_response()
}

pub async fn set_config(State(state): State<AppState>, body: String) -> Response {
    let config: CostConfig = match serde_json::from_str(&body) {
        Ok(c) => c,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("malformed body: {}", e)),
    };
    if config.daily_budget < 0.0 || config.weekly_budget < 0.0 {
        return api_error(StatusCode::BAD_REQUEST, "budgets must be non-negative");
    }
    match state.ctx.cost.set_config(config) {
        Ok(()) => Json(json!({"config": state.ctx.cost.config()})).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
