use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::api_error;
use crate::core::tasks::TaskStatus;
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let status = match query.status.as_deref() {
        Some(raw) => match TaskStatus::from_str(raw) {
            Some(s) => Some(s),
            None => return api_error(StatusCode::BAD_REQUEST, format!("unknown status '{}'", raw)),
        },
        None => None,
    };
    Json(json!({"tasks": state.ctx.tasks.list_by_status(status)})).into_response()
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state
        .ctx
        .tasks
        .get(&id)
        .or_else(|| state.ctx.tasks.get_by_prefix(&id))
    {
        Some(task) => Json(json!({
            "task": task,
            "subtasks": state.ctx.tasks.list_subtasks(&task.id),
        }))
        .into_response(),
        None => api_error(StatusCode::NOT_FOUND, "task not found"),
    }
}

pub async fn action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("malformed body: {}", e)),
    };
    let Some(action) = parsed.get("action").and_then(|v| v.as_str()) else {
        return api_error(StatusCode::BAD_REQUEST, "missing 'action'");
    };

    let Some(task) = state
        .ctx
        .tasks
        .get(&id)
        .or_else(|| state.ctx.tasks.get_by_prefix(&id))
    else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };

    let outcome = match action {
        "cancel" => state
            .ctx
            .tasks
            .update_status(&task.id, TaskStatus::Cancelled, None, None, None)
            .map(Some),
        "pause" => state
            .ctx
            .tasks
            .update_status(&task.id, TaskStatus::Paused, None, None, None)
            .map(Some),
        "resume" => state
            .ctx
            .tasks
            .update_status(&task.id, TaskStatus::Pending, None, None, None)
            .map(Some),
        "delete" => state.ctx.tasks.delete(&task.id).map(|_| None),
        other => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown action '{}'", other),
            );
        }
    };

    match outcome {
        Ok(Some(task)) => Json(json!({"task": task})).into_response(),
        Ok(None) => Json(json!({"deleted": true})).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
