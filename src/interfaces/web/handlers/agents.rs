use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::interfaces::web::AppState;

/// Sub-agent snapshot plus the configured model routes.
pub async fn snapshot(State(state): State<AppState>) -> Response {
    Json(json!({
        "agents": state.agents.snapshot(),
        "routes": state.llm.routes(),
    }))
    .into_response()
}
