use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_str, req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::heartbeat::HEARTBEAT_FILE;
use crate::triggers::{ActionKind, NewTrigger, TriggerAction, TriggerType};

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Schedule,
        "schedule_cron",
        "Register a recurring cron job (standard 5-field expression) that sends the agent a prompt.",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "expression": {"type": "string", "description": "e.g. '0 9 * * 1-5'"},
                "prompt": {"type": "string", "description": "What the agent should do when it fires"}
            },
            "required": ["name", "expression", "prompt"]
        }),
        Arc::new(ScheduleCron),
    );
    reg.register(
        ToolCategory::Schedule,
        "cancel_cron",
        "Cancel a cron job by name.",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"}
            },
            "required": ["name"]
        }),
        Arc::new(CancelCron),
    );
    reg.register(
        ToolCategory::Schedule,
        "edit_heartbeat",
        "Replace the heartbeat checklist (markdown checkbox list reviewed on every heartbeat).",
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Markdown with '- [ ]' items"}
            },
            "required": ["content"]
        }),
        Arc::new(EditHeartbeat),
    );
}

struct ScheduleCron;

#[async_trait]
impl ToolHandler for ScheduleCron {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let name = req_str(&args, "name")?;
        let expression = req_str(&args, "expression")?;
        let prompt = req_str(&args, "prompt")?;

        let trigger = ctx.triggers.create(NewTrigger {
            trigger_type: TriggerType::Cron,
            name: name.to_string(),
            config: json!({"expression": expression}),
            action: TriggerAction {
                kind: ActionKind::Message,
                content: prompt.to_string(),
                channel: opt_str(&args, "channel").map(|s| s.to_string()),
                user: opt_str(&args, "user").map(|s| s.to_string()),
            },
        })?;
        Ok(format!(
            "cron job '{}' scheduled ({}), id {}",
            trigger.name, expression, trigger.id
        ))
    }
}

struct CancelCron;

#[async_trait]
impl ToolHandler for CancelCron {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let name = req_str(&args, "name")?;
        let removed = ctx
            .triggers
            .delete_by_name(name)
            .map_err(|e| AgentError::transport(e.to_string()))?;
        if removed {
            Ok(format!("cron job '{}' cancelled", name))
        } else {
            Err(AgentError::validation(format!("no cron job named '{}'", name)))
        }
    }
}

struct EditHeartbeat;

#[async_trait]
impl ToolHandler for EditHeartbeat {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let content = req_str(&args, "content")?;
        let path = ctx.workspace.join(HEARTBEAT_FILE);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AgentError::transport(format!("cannot write heartbeat file: {}", e)))?;
        let items = content.matches("- [ ]").count();
        Ok(format!(
            "heartbeat checklist updated ({} open items)",
            items
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, context};
    use tempfile::tempdir;

    #[tokio::test]
    async fn schedule_and_cancel_cron() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();

        let result = reg
            .execute(
                &ctx,
                &call(
                    "schedule_cron",
                    json!({"name": "standup", "expression": "0 9 * * 1-5", "prompt": "post the standup summary"}),
                ),
                "web",
                "u",
            )
            .await;
        assert!(!result.is_error, "{}", result.content);
        assert_eq!(ctx.triggers.list().len(), 1);

        let bad = reg
            .execute(
                &ctx,
                &call(
                    "schedule_cron",
                    json!({"name": "broken", "expression": "whenever", "prompt": "x"}),
                ),
                "web",
                "u",
            )
            .await;
        assert!(bad.is_error);

        let cancelled = reg
            .execute(&ctx, &call("cancel_cron", json!({"name": "standup"})), "web", "u")
            .await;
        assert!(!cancelled.is_error);
        assert!(ctx.triggers.list().is_empty());
    }

    #[tokio::test]
    async fn edit_heartbeat_writes_checklist() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(
                &ctx,
                &call(
                    "edit_heartbeat",
                    json!({"content": "# Checklist\n- [ ] rotate logs\n- [x] done item\n"}),
                ),
                "web",
                "u",
            )
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("1 open items"));
        let text = std::fs::read_to_string(tmp.path().join(HEARTBEAT_FILE)).unwrap();
        assert!(text.contains("rotate logs"));
    }
}
