use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use super::engine::TriggerDispatcher;
use super::TriggerType;

type HmacSha256 = Hmac<Sha256>;

/// Shared HTTP listener for webhook triggers, on its own loopback port.
/// Routes by each trigger's configured path; everything else is 404.
pub struct WebhookServer {
    dispatcher: Arc<TriggerDispatcher>,
    host: String,
    port: u16,
}

#[derive(Clone)]
struct WebhookState {
    dispatcher: Arc<TriggerDispatcher>,
}

impl WebhookServer {
    pub fn new(dispatcher: Arc<TriggerDispatcher>, host: String, port: u16) -> Self {
        Self {
            dispatcher,
            host,
            port,
        }
    }

    pub async fn start(&self) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let state = WebhookState {
            dispatcher: Arc::clone(&self.dispatcher),
        };
        let max_body = self
            .dispatcher
            .settings()
            .max_request_body_bytes;
        let app = Router::new()
            .fallback(any(handle))
            .layer(axum::extract::DefaultBodyLimit::max(max_body))
            .with_state(state);

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("webhook listener on http://{}", addr);
        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("webhook listener stopped: {}", e);
            }
        }))
    }
}

async fn handle(
    State(state): State<WebhookState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let trigger = state
        .dispatcher
        .registry()
        .list()
        .into_iter()
        .find(|t| {
            t.enabled
                && t.trigger_type == TriggerType::Webhook
                && t.config.get("path").and_then(|v| v.as_str()) == Some(path.as_str())
        });

    let Some(trigger) = trigger else {
        return (StatusCode::NOT_FOUND, "no webhook at this path").into_response();
    };

    if let Some(secret) = trigger
        .config
        .get("secret")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        if !verify_secret(&headers, &body, secret) {
            warn!("webhook '{}': secret mismatch", trigger.name);
            return (StatusCode::UNAUTHORIZED, "bad signature").into_response();
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .unwrap_or_else(|_| serde_json::json!({"raw": String::from_utf8_lossy(&body)}));
    state.dispatcher.fire(&trigger.id, payload).await;
    (StatusCode::OK, "ok").into_response()
}

/// Either a plain shared secret in `X-Webhook-Secret` or a GitHub-style
/// `X-Hub-Signature-256: sha256=<hmac>` over the body.
fn verify_secret(headers: &HeaderMap, body: &[u8], secret: &str) -> bool {
    if let Some(presented) = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
    {
        return crate::security::gateway::token_matches(secret, presented);
    }
    if let Some(signature) = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("sha256="))
    {
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(body);
        let expected: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        return crate::security::gateway::token_matches(&expected, signature);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &'static str, value: String) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn plain_secret_header_verifies() {
        let headers = headers_with("x-webhook-secret", "hunter2".to_string());
        assert!(verify_secret(&headers, b"{}", "hunter2"));
        assert!(!verify_secret(&headers, b"{}", "other"));
    }

    #[test]
    fn github_signature_verifies() {
        let secret = "shh";
        let body = b"{\"action\":\"push\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        let headers = headers_with("x-hub-signature-256", format!("sha256={}", sig));
        assert!(verify_secret(&headers, body, secret));
        assert!(!verify_secret(&headers, b"tampered", secret));
    }

    #[test]
    fn missing_headers_fail_when_secret_configured() {
        assert!(!verify_secret(&HeaderMap::new(), b"{}", "secret"));
    }
}
