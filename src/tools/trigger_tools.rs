use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_str, req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::triggers::{ActionKind, NewTrigger, TriggerAction, TriggerType};

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Triggers,
        "create_trigger",
        "Create an event trigger (file_watch, webhook, cron, calendar, email_watch) that \
         feeds the agent when it fires.",
        json!({
            "type": "object",
            "properties": {
                "type": {"type": "string", "enum": ["file_watch", "webhook", "cron", "calendar", "email_watch"]},
                "name": {"type": "string"},
                "config": {"type": "object", "description": "Type-specific configuration"},
                "action_kind": {"type": "string", "enum": ["message", "task"]},
                "action_content": {"type": "string"},
                "channel": {"type": "string"},
                "user": {"type": "string"}
            },
            "required": ["type", "name", "action_content"]
        }),
        Arc::new(CreateTrigger),
    );
    reg.register(
        ToolCategory::Triggers,
        "list_triggers",
        "List registered triggers with their fire counts.",
        json!({"type": "object", "properties": {}}),
        Arc::new(ListTriggers),
    );
    reg.register(
        ToolCategory::Triggers,
        "delete_trigger",
        "Delete a trigger by id or name.",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "name": {"type": "string"}
            }
        }),
        Arc::new(DeleteTrigger),
    );
}

struct CreateTrigger;

#[async_trait]
impl ToolHandler for CreateTrigger {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let trigger_type = TriggerType::from_str(req_str(&args, "type")?)
            .ok_or_else(|| AgentError::validation("unknown trigger type"))?;
        let kind = match opt_str(&args, "action_kind") {
            Some("task") => ActionKind::Task,
            _ => ActionKind::Message,
        };

        let trigger = ctx.triggers.create(NewTrigger {
            trigger_type,
            name: req_str(&args, "name")?.to_string(),
            config: args.get("config").cloned().unwrap_or_else(|| json!({})),
            action: TriggerAction {
                kind,
                content: req_str(&args, "action_content")?.to_string(),
                channel: opt_str(&args, "channel").map(|s| s.to_string()),
                user: opt_str(&args, "user").map(|s| s.to_string()),
            },
        })?;
        Ok(format!(
            "trigger '{}' ({}) created, id {}. It becomes active on the next engine reload.",
            trigger.name,
            trigger.trigger_type.as_str(),
            trigger.id
        ))
    }
}

struct ListTriggers;

#[async_trait]
impl ToolHandler for ListTriggers {
    async fn run(&self, ctx: &ToolContext, _args: Value) -> Result<String, AgentError> {
        let triggers = ctx.triggers.list();
        if triggers.is_empty() {
            return Ok("no triggers".to_string());
        }
        let mut out = String::new();
        for t in triggers {
            out.push_str(&format!(
                "{} [{}] {} - {} fires{}\n",
                &t.id[..8.min(t.id.len())],
                t.trigger_type.as_str(),
                t.name,
                t.fire_count,
                if t.enabled { "" } else { " (disabled)" }
            ));
        }
        Ok(out)
    }
}

struct DeleteTrigger;

#[async_trait]
impl ToolHandler for DeleteTrigger {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let removed = if let Some(id) = opt_str(&args, "id") {
            ctx.triggers
                .delete(id)
                .map_err(|e| AgentError::transport(e.to_string()))?
        } else if let Some(name) = opt_str(&args, "name") {
            ctx.triggers
                .delete_by_name(name)
                .map_err(|e| AgentError::transport(e.to_string()))?
        } else {
            return Err(AgentError::validation("provide 'id' or 'name'"));
        };
        if removed {
            Ok("trigger deleted".to_string())
        } else {
            Err(AgentError::validation("trigger not found"))
        }
    }
}
