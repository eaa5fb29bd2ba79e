pub mod agents;
pub mod approvals;
pub mod audit;
pub mod costs;
pub mod settings;
pub mod status;
pub mod tasks;
pub mod triggers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Uniform JSON error helper.
pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (
        status,
        Json(serde_json::json!({"error": message.to_string()})),
    )
        .into_response()
}
