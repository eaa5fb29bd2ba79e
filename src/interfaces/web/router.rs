use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers::{agents, approvals, audit, costs, settings, status, tasks, triggers};
use super::{auth, ws, AppState};

fn same_origin_cors(host: &str, port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://{}:{}", host, port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
}

pub(crate) fn build(state: AppState, host: &str, port: u16) -> Router {
    let max_body = state.ctx.settings.get().max_request_body_bytes;
    let cors = same_origin_cors(host, port);

    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/skills", get(status::skills))
        .route("/memory", get(status::memory))
        .route(
            "/admin/api/settings",
            get(settings::get_settings).post(settings::patch_settings),
        )
        .route("/admin/api/settings/confirm", post(settings::confirm_token))
        .route("/admin/api/tasks", get(tasks::list))
        .route("/admin/api/tasks/{id}", get(tasks::get))
        .route("/admin/api/tasks/{id}/action", post(tasks::action))
        .route("/admin/api/approvals", get(approvals::list))
        .route("/admin/api/approvals/{id}", post(approvals::resolve))
        .route("/admin/api/costs/today", get(costs::today))
        .route("/admin/api/costs/history", get(costs::history))
        .route(
            "/admin/api/costs/config",
            get(costs::get_config).post(costs::set_config),
        )
        .route("/admin/api/triggers", get(triggers::list))
        .route("/admin/api/triggers/{id}/toggle", post(triggers::toggle))
        .route("/admin/api/triggers/{id}", delete(triggers::remove))
        .route("/admin/api/agents", get(agents::snapshot))
        .route("/admin/api/audit", get(audit::read))
        .route("/admin/api/audit/dates", get(audit::dates))
        .route("/ws", get(ws::upgrade))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(auth::security_headers))
        .layer(axum::extract::DefaultBodyLimit::max(max_body))
        .layer(cors)
        .with_state(state)
}
