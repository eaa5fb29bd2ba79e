use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::api_error;
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct AuditQuery {
    date: Option<String>,
}

pub async fn read(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> Response {
    if let Some(date) = &query.date {
        // Audit files are keyed by YYYY-MM-DD; reject anything else early.
        if date.len() != 10 || !date.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return api_error(StatusCode::BAD_REQUEST, "date must be YYYY-MM-DD");
        }
    }
    match state.ctx.audit.read_day(query.date.as_deref()) {
        Ok(entries) => Json(json!({"entries": entries})).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn dates(State(state): State<AppState>) -> Response {
    Json(json!({"dates": state.ctx.audit.dates()})).into_response()
}
