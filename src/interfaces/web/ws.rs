use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde_json::json;
use tracing::debug;

use super::AppState;

/// Authenticated by the shared middleware (header or `?token=`). Sends a
/// hello, then relays the sanitized event stream; accepts `ping` and
/// `status` requests.
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle(socket, state))
}

async fn handle(mut socket: WebSocket, state: AppState) {
    let hello = json!({
        "type": "connected",
        "name": state.agent_name,
    });
    if socket.send(Message::Text(hello.to_string().into())).await.is_err() {
        return;
    }

    let mut events = state.ctx.events.subscribe();
    let mut logs = state.log_tx.subscribe();
    loop {
        tokio::select! {
            line = logs.recv() => {
                match line {
                    Ok(line) => {
                        let payload = json!({"type": "log", "line": line.trim_end()});
                        if socket.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        // Events carry previews and key names only; see
                        // core::events for the construction-site contract.
                        let payload = match serde_json::to_string(&event) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // Lagged subscribers just skip ahead.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                if let Message::Text(text) = message {
                    let reply = match classify(&text) {
                        Some("ping") => Some(json!({"type": "pong"})),
                        Some("status") => Some(json!({
                            "type": "status",
                            "name": state.agent_name,
                            "uptime_secs": state.started_at.elapsed().as_secs(),
                            "today_cost": state.ctx.cost.today().cost,
                        })),
                        _ => None,
                    };
                    if let Some(reply) = reply {
                        if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("websocket client disconnected");
}

fn classify(text: &str) -> Option<&'static str> {
    let parsed: serde_json::Value = serde_json::from_str(text).ok()?;
    match parsed.get("type").and_then(|v| v.as_str()) {
        Some("ping") => Some("ping"),
        Some("status") => Some("status"),
        _ => None,
    }
}
