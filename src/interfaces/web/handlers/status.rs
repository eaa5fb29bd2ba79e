use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::interfaces::web::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": state.agent_name,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let route = state.llm.default_route();
    let memory_count = state.ctx.memory.entry_count().await.unwrap_or(0);
    Json(json!({
        "name": state.agent_name,
        "provider": route.as_ref().map(|r| r.provider.clone()),
        "model": route.as_ref().map(|r| r.model.clone()),
        "skills": state.skills.count(),
        "memory_entries": memory_count,
        "autonomy": state.ctx.settings.get().autonomy_level.as_str(),
    }))
}

pub async fn skills(State(state): State<AppState>) -> Json<serde_json::Value> {
    let skills: Vec<serde_json::Value> = state
        .skills
        .all()
        .iter()
        .map(|s| json!({"name": s.name, "description": s.description}))
        .collect();
    Json(json!({"skills": skills}))
}

pub async fn memory(State(state): State<AppState>) -> Json<serde_json::Value> {
    let entries = state.ctx.memory.bullets(100).await.unwrap_or_default();
    Json(json!({
        "count": state.ctx.memory.entry_count().await.unwrap_or(0),
        "entries": entries,
    }))
}
