use serde::Serialize;
use tokio::sync::broadcast;

/// Events published on the process-wide bus and relayed (already sanitized)
/// to WebSocket subscribers. Construction sites must only put previews and
/// key names here, never raw tool inputs or full outputs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    MessageReceived {
        channel: String,
        username: String,
        preview: String,
    },
    ToolCalled {
        tool: String,
        input_keys: Vec<String>,
    },
    ToolResult {
        tool: String,
        preview: String,
        is_error: bool,
    },
    ApprovalRequested {
        id: String,
        description: String,
        risk: String,
    },
    ApprovalResolved {
        id: String,
        status: String,
        resolver: String,
    },
    TriggerFired {
        id: String,
        name: String,
        trigger_type: String,
    },
    HeartbeatTick {
        pending_items: usize,
    },
    TaskUpdated {
        id: String,
        status: String,
        progress: u8,
    },
}

pub type EventBus = broadcast::Sender<AgentEvent>;

pub fn event_bus() -> EventBus {
    broadcast::channel(256).0
}

/// Send ignoring the no-subscribers case.
pub fn publish(bus: &EventBus, event: AgentEvent) {
    let _ = bus.send(event);
}

/// First `max` characters of `s`, used everywhere an event carries content.
pub fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
