mod browser;
mod cost_tools;
mod files;
mod integrations;
mod memory_tools;
mod schedule;
mod shell;
mod system;
mod task_tools;
mod trigger_tools;
mod web;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::approvals::{ApprovalBroker, ApprovalRisk};
use crate::core::cost::CostTracker;
use crate::core::errors::AgentError;
use crate::core::events::{preview, publish, AgentEvent, EventBus};
use crate::core::llm::{ToolCallRequest, ToolSpec};
use crate::core::memory::Memory;
use crate::core::settings::{RuntimeSettings, SettingsStore};
use crate::core::tasks::TaskStore;
use crate::security::audit::{AuditEntry, AuditLog};
use crate::triggers::TriggerRegistry;

/// Request to start an orchestration job; consumed by the orchestrator
/// service spawned at boot. Decouples the `create_task` tool from the
/// session loop it would otherwise recurse into.
#[derive(Debug)]
pub struct OrchestrationRequest {
    pub task_id: String,
    pub objective: String,
}

/// Everything a tool handler may touch. One instance per process, shared by
/// every worker.
pub struct ToolContext {
    pub workspace: PathBuf,
    pub settings: Arc<SettingsStore>,
    pub cost: Arc<CostTracker>,
    pub tasks: Arc<TaskStore>,
    pub approvals: Arc<ApprovalBroker>,
    pub triggers: Arc<TriggerRegistry>,
    pub memory: Arc<dyn Memory>,
    pub audit: Arc<AuditLog>,
    pub events: EventBus,
    pub orchestrate_tx: mpsc::Sender<OrchestrationRequest>,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error: {}", message),
            is_error: true,
        }
    }
}

/// Tool categories map onto the runtime permission switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Files,
    Shell,
    Web,
    Browser,
    Memory,
    Schedule,
    Tasks,
    Cost,
    Triggers,
    Email,
    Social,
    System,
}

impl ToolCategory {
    fn permitted(self, settings: &RuntimeSettings) -> bool {
        match self {
            ToolCategory::Files => settings.allow_file_ops,
            ToolCategory::Shell => settings.allow_shell,
            ToolCategory::Web => settings.allow_web,
            ToolCategory::Browser => settings.allow_browser,
            ToolCategory::Schedule => settings.allow_schedule,
            ToolCategory::Email => settings.allow_email,
            ToolCategory::Social => settings.allow_social,
            ToolCategory::System => settings.allow_system_control,
            ToolCategory::Memory | ToolCategory::Tasks | ToolCategory::Cost | ToolCategory::Triggers => true,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError>;
}

pub struct ToolEntry {
    pub spec: ToolSpec,
    pub category: ToolCategory,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of every tool the agent can use. Execution funnels through one
/// pipeline: lookup → event → handler → truncate → audit → event.
pub struct ToolRegistry {
    tools: Vec<ToolEntry>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry with every built-in tool installed.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        files::register(&mut reg);
        shell::register(&mut reg);
        web::register(&mut reg);
        browser::register(&mut reg);
        memory_tools::register(&mut reg);
        schedule::register(&mut reg);
        task_tools::register(&mut reg);
        cost_tools::register(&mut reg);
        trigger_tools::register(&mut reg);
        integrations::register(&mut reg);
        system::register(&mut reg);
        reg
    }

    pub fn register(
        &mut self,
        category: ToolCategory,
        name: &str,
        description: &str,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) {
        if self.by_name.contains_key(name) {
            warn!("tool '{}' registered twice, keeping the first", name);
            return;
        }
        self.by_name.insert(name.to_string(), self.tools.len());
        self.tools.push(ToolEntry {
            spec: ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
            category,
            handler,
        });
    }

    /// Tool surfaces visible to the model, filtered by category permissions.
    pub fn definitions(&self, settings: &RuntimeSettings) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .filter(|t| t.category.permitted(settings))
            .map(|t| t.spec.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Run one tool call through the full pipeline. Guard and validation
    /// failures never escape: they become error results here.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        call: &ToolCallRequest,
        channel: &str,
        user: &str,
    ) -> ToolResult {
        let Some(&idx) = self.by_name.get(&call.name) else {
            return ToolResult::error(format!("unknown tool '{}'", call.name));
        };
        let entry = &self.tools[idx];

        let settings = ctx.settings.get();
        if !entry.category.permitted(&settings) {
            let result = ToolResult::error(format!(
                "tool '{}' is disabled by runtime settings",
                call.name
            ));
            ctx.audit.record(
                AuditEntry::new("tool_call", channel, user)
                    .tool(&call.name)
                    .blocked("tool category disabled"),
            );
            return result;
        }

        let input_keys: Vec<String> = call
            .arguments
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        publish(
            &ctx.events,
            AgentEvent::ToolCalled {
                tool: call.name.clone(),
                input_keys,
            },
        );

        let outcome = entry.handler.run(ctx, call.arguments.clone()).await;

        let (result, blocked_reason) = match outcome {
            Ok(content) => {
                let truncated = truncate_output(&content, settings.max_tool_output_chars);
                (ToolResult::ok(truncated), None)
            }
            Err(e) => {
                let blocked = if e.is_blocked() {
                    Some(e.to_string())
                } else {
                    None
                };
                (ToolResult::error(&e), blocked)
            }
        };

        let mut audit = AuditEntry::new("tool_call", channel, user)
            .tool(&call.name)
            .input(&call.arguments.to_string())
            .result(&result.content);
        if let Some(reason) = blocked_reason {
            audit = audit.blocked(reason);
        }
        ctx.audit.record(audit);

        publish(
            &ctx.events,
            AgentEvent::ToolResult {
                tool: call.name.clone(),
                preview: preview(&result.content, 200),
                is_error: result.is_error,
            },
        );

        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_output(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}\n… [output truncated at {} chars]", cut, max_chars)
    }
}

/// Tools that always require approval at medium autonomy.
pub const DANGEROUS_TOOLS: &[&str] = &[
    "run_shell",
    "write_file",
    "email_send",
    "mastodon_post",
    "reddit_post",
    "open_application",
    "clipboard_write",
];

/// Implicit risk label per tool. Unlisted tools default to medium.
pub fn risk_of(tool: &str) -> ApprovalRisk {
    match tool {
        "read_file" | "list_directory" | "recall" | "system_info" | "web_fetch" | "list_tasks"
        | "list_triggers" | "get_costs" | "clipboard_read" => ApprovalRisk::Low,
        "run_shell" | "email_send" | "mastodon_post" | "reddit_post" | "open_application" => {
            ApprovalRisk::High
        }
        _ => ApprovalRisk::Medium,
    }
}

pub fn is_dangerous(tool: &str) -> bool {
    DANGEROUS_TOOLS.contains(&tool)
}

// ── argument helpers shared by the builtin tools ──

pub(crate) fn req_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, AgentError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AgentError::validation(format!("missing required string '{}'", key)))
}

pub(crate) fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub(crate) fn opt_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

pub(crate) fn opt_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::core::events::event_bus;
    use crate::core::llm::ToolCallRequest;
    use crate::core::memory::MarkdownMemory;
    use std::path::Path;

    /// Context over a temp workspace with default settings.
    pub async fn context(workspace: &Path) -> ToolContext {
        let events = event_bus();
        let (orchestrate_tx, _rx) = mpsc::channel(8);
        ToolContext {
            workspace: workspace.to_path_buf(),
            settings: Arc::new(SettingsStore::open(workspace, "test-secret".into()).unwrap()),
            cost: Arc::new(CostTracker::open(workspace).unwrap()),
            tasks: Arc::new(TaskStore::open(workspace).unwrap()),
            approvals: ApprovalBroker::open(workspace, events.clone()).unwrap(),
            triggers: Arc::new(TriggerRegistry::open(workspace).unwrap()),
            memory: Arc::new(MarkdownMemory::open(workspace).unwrap()),
            audit: Arc::new(AuditLog::open(workspace, true).unwrap()),
            events,
            orchestrate_tx,
        }
    }

    pub fn call(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_test".to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use super::testutil::{call, context};

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(&ctx, &call("no_such_tool", json!({})), "web", "u")
            .await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn disabled_category_hides_definitions_and_blocks_execution() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        ctx.settings
            .update(&json!({"allow_shell": false}), &[])
            .unwrap();

        let reg = ToolRegistry::with_builtins();
        let settings = ctx.settings.get();
        assert!(!reg
            .definitions(&settings)
            .iter()
            .any(|t| t.name == "run_shell"));

        let result = reg
            .execute(
                &ctx,
                &call("run_shell", json!({"command": "echo hi"})),
                "web",
                "u",
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("disabled"));
    }

    #[tokio::test]
    async fn blocked_shell_command_is_audited_as_blocked() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();

        let result = reg
            .execute(
                &ctx,
                &call("run_shell", json!({"command": "rm -rf /"})),
                "telegram",
                "alice",
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Error:"));

        ctx.audit.flush();
        let entries = ctx.audit.read_day(None).unwrap();
        let blocked = entries.iter().find(|e| e["blocked"] == true).unwrap();
        assert_eq!(blocked["tool"], "run_shell");
        assert_eq!(blocked["user"], "alice");
    }

    #[tokio::test]
    async fn output_is_truncated_to_setting() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        ctx.settings
            .update(&json!({"max_tool_output_chars": 50}), &[])
            .unwrap();
        std::fs::write(tmp.path().join("big.txt"), "x".repeat(500)).unwrap();

        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(
                &ctx,
                &call("read_file", json!({"path": "big.txt"})),
                "web",
                "u",
            )
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("[output truncated at 50 chars]"));
    }

    #[test]
    fn risk_labels_match_policy() {
        assert_eq!(risk_of("read_file"), ApprovalRisk::Low);
        assert_eq!(risk_of("web_fetch"), ApprovalRisk::Low);
        assert_eq!(risk_of("write_file"), ApprovalRisk::Medium);
        assert_eq!(risk_of("browser_action"), ApprovalRisk::Medium);
        assert_eq!(risk_of("run_shell"), ApprovalRisk::High);
        assert_eq!(risk_of("email_send"), ApprovalRisk::High);
        assert!(is_dangerous("run_shell"));
        assert!(is_dangerous("clipboard_write"));
        assert!(!is_dangerous("read_file"));
    }

    #[tokio::test]
    async fn events_carry_key_names_not_values() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let mut rx = ctx.events.subscribe();
        std::fs::write(tmp.path().join("a.txt"), "secret-content").unwrap();

        let reg = ToolRegistry::with_builtins();
        reg.execute(&ctx, &call("read_file", json!({"path": "a.txt"})), "web", "u")
            .await;

        let called = rx.recv().await.unwrap();
        match called {
            AgentEvent::ToolCalled { tool, input_keys } => {
                assert_eq!(tool, "read_file");
                assert_eq!(input_keys, vec!["path".to_string()]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
