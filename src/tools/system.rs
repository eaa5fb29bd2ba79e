use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::platform::{NativePlatform, Platform};

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::System,
        "clipboard_read",
        "Read the system clipboard.",
        json!({"type": "object", "properties": {}}),
        Arc::new(ClipboardRead),
    );
    reg.register(
        ToolCategory::System,
        "clipboard_write",
        "Write text to the system clipboard.",
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"}
            },
            "required": ["text"]
        }),
        Arc::new(ClipboardWrite),
    );
    reg.register(
        ToolCategory::System,
        "open_application",
        "Open an application by name.",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"}
            },
            "required": ["name"]
        }),
        Arc::new(OpenApplication),
    );
    reg.register(
        ToolCategory::System,
        "system_info",
        "Describe the host: OS, architecture, workspace path.",
        json!({"type": "object", "properties": {}}),
        Arc::new(SystemInfo),
    );
}

/// Application names and clipboard text go straight into platform commands;
/// strip anything that could be interpreted by a shell.
fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ','))
        .collect()
}

struct ClipboardRead;

#[async_trait]
impl ToolHandler for ClipboardRead {
    async fn run(&self, _ctx: &ToolContext, _args: Value) -> Result<String, AgentError> {
        let (program, args) = NativePlatform::clipboard_read_command();
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(|e| AgentError::transport(format!("clipboard read failed: {}", e)))?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

struct ClipboardWrite;

#[async_trait]
impl ToolHandler for ClipboardWrite {
    async fn run(&self, _ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let text = req_str(&args, "text")?;
        let (program, cmd_args) = NativePlatform::clipboard_write_command();
        let mut child = tokio::process::Command::new(program)
            .args(cmd_args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::transport(format!("clipboard write failed: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| AgentError::transport(e.to_string()))?;
        }
        child
            .wait()
            .await
            .map_err(|e| AgentError::transport(e.to_string()))?;
        Ok(format!("{} chars copied to clipboard", text.chars().count()))
    }
}

struct OpenApplication;

#[async_trait]
impl ToolHandler for OpenApplication {
    async fn run(&self, _ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let raw = req_str(&args, "name")?;
        let name = sanitize(raw);
        if name.trim().is_empty() {
            return Err(AgentError::validation("application name is empty after sanitization"));
        }
        let (program, cmd_args) = NativePlatform::open_application_command(&name);
        tokio::process::Command::new(program)
            .args(cmd_args)
            .spawn()
            .map_err(|e| AgentError::transport(format!("cannot open '{}': {}", name, e)))?;
        Ok(format!("opening {}", name))
    }
}

struct SystemInfo;

#[async_trait]
impl ToolHandler for SystemInfo {
    async fn run(&self, ctx: &ToolContext, _args: Value) -> Result<String, AgentError> {
        Ok(format!(
            "host: {}\nworkspace: {}\nagent: {}",
            NativePlatform::describe(),
            ctx.workspace.display(),
            ctx.settings.get().agent_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_shell_metacharacters() {
        assert_eq!(sanitize("Safari"), "Safari");
        assert_eq!(sanitize("Visual Studio Code"), "Visual Studio Code");
        assert_eq!(sanitize("evil; rm -rf /"), "evil rm -rf ");
        assert_eq!(sanitize("$(payload)"), "payload");
        assert_eq!(sanitize("app`whoami`"), "appwhoami");
    }
}
