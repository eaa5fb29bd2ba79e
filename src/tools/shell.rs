use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::platform::{NativePlatform, Platform};
use crate::security::shell::validate_shell_command;

const MAX_CAPTURE_BYTES: usize = 5 * 1024 * 1024;
const STDOUT_CHARS: usize = 10_000;
const STDERR_CHARS: usize = 5_000;

/// Env var suffixes stripped from the child environment.
const SECRET_SUFFIXES: &[&str] = &["_API_KEY", "_TOKEN", "_BOT_TOKEN"];

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Shell,
        "run_shell",
        "Run a shell command inside the workspace. Destructive commands are rejected.",
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The command line to execute"},
                "timeout_secs": {"type": "integer", "description": "Optional timeout override, capped at 120"}
            },
            "required": ["command"]
        }),
        Arc::new(RunShell),
    );
}

struct RunShell;

#[async_trait]
impl ToolHandler for RunShell {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let command = req_str(&args, "command")?;
        validate_shell_command(command)?;

        let settings = ctx.settings.get();
        let timeout_secs = super::opt_u64(&args, "timeout_secs")
            .unwrap_or(settings.effective_shell_timeout_secs())
            .min(120);

        info!("run_shell: {}", command);

        let mut cmd = NativePlatform::shell_inline(command);
        cmd.current_dir(&ctx.workspace);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // The child inherits the host environment minus anything that looks
        // like a credential.
        for (key, _) in std::env::vars() {
            if SECRET_SUFFIXES.iter().any(|s| key.ends_with(s)) {
                cmd.env_remove(&key);
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| AgentError::transport(format!("spawn failed: {}", e)))?;

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(AgentError::transport(format!("wait failed: {}", e))),
            Err(_) => {
                return Err(AgentError::transport(format!(
                    "command timed out after {} s",
                    timeout_secs
                )));
            }
        };

        let stdout = clamp_bytes(&output.stdout);
        let stderr = clamp_bytes(&output.stderr);
        let stdout: String = String::from_utf8_lossy(stdout).chars().take(STDOUT_CHARS).collect();
        let stderr: String = String::from_utf8_lossy(stderr).chars().take(STDERR_CHARS).collect();

        let mut result = format!("exit status: {}\n", output.status.code().unwrap_or(-1));
        if !stdout.is_empty() {
            result.push_str(&format!("stdout:\n{}\n", stdout));
        }
        if !stderr.is_empty() {
            result.push_str(&format!("stderr:\n{}\n", stderr));
        }
        Ok(result)
    }
}

fn clamp_bytes(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(MAX_CAPTURE_BYTES)]
}
