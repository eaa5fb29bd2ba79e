use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_bool, req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::security::paths::safe_path;

/// Extensions `write_file` refuses to create.
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "msi", "scr", "ps1", "vbs", "wsf",
];

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Files,
        "read_file",
        "Read a text file from the workspace.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"}
            },
            "required": ["path"]
        }),
        Arc::new(ReadFile),
    );
    reg.register(
        ToolCategory::Files,
        "write_file",
        "Write (or append to) a text file in the workspace. Parent directories are created.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
                "append": {"type": "boolean", "description": "Append instead of overwrite"}
            },
            "required": ["path", "content"]
        }),
        Arc::new(WriteFile),
    );
    reg.register(
        ToolCategory::Files,
        "list_directory",
        "List the entries of a workspace directory.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Defaults to the workspace root"}
            }
        }),
        Arc::new(ListDirectory),
    );
}

fn jailed(ctx: &ToolContext, raw: &str) -> Result<std::path::PathBuf, AgentError> {
    let settings = ctx.settings.get();
    if settings.sandbox_enabled {
        safe_path(&ctx.workspace, raw)
    } else {
        Ok(ctx.workspace.join(raw))
    }
}

struct ReadFile;

#[async_trait]
impl ToolHandler for ReadFile {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let path = jailed(ctx, req_str(&args, "path")?)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::transport(format!("cannot read {:?}: {}", path, e)))
    }
}

struct WriteFile;

#[async_trait]
impl ToolHandler for WriteFile {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let raw = req_str(&args, "path")?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::validation("missing required string 'content'"))?;
        let append = opt_bool(&args, "append").unwrap_or(false);

        let path = jailed(ctx, raw)?;
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if EXECUTABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return Err(AgentError::security(format!(
                    "refusing to write executable file type '.{}'",
                    ext
                )));
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::transport(format!("cannot create {:?}: {}", parent, e)))?;
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| AgentError::transport(format!("cannot open {:?}: {}", path, e)))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| AgentError::transport(e.to_string()))?;
        } else {
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| AgentError::transport(format!("cannot write {:?}: {}", path, e)))?;
        }

        Ok(format!(
            "{} {} bytes to {}",
            if append { "appended" } else { "wrote" },
            content.len(),
            raw
        ))
    }
}

struct ListDirectory;

#[async_trait]
impl ToolHandler for ListDirectory {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let raw = super::opt_str(&args, "path").unwrap_or(".");
        let path = jailed(ctx, raw)?;

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| AgentError::transport(format!("cannot list {:?}: {}", path, e)))?;

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let suffix = if entry.path().is_dir() { "/" } else { "" };
            names.push(format!("{}{}", entry.file_name().to_string_lossy(), suffix));
        }
        names.sort();
        if names.is_empty() {
            Ok("(empty)".to_string())
        } else {
            Ok(names.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, context};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_read_list_roundtrip() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();

        let written = reg
            .execute(
                &ctx,
                &call(
                    "write_file",
                    json!({"path": "notes/today.md", "content": "- buy milk\n"}),
                ),
                "web",
                "u",
            )
            .await;
        assert!(!written.is_error, "{}", written.content);

        let read = reg
            .execute(
                &ctx,
                &call("read_file", json!({"path": "notes/today.md"})),
                "web",
                "u",
            )
            .await;
        assert_eq!(read.content, "- buy milk\n");

        let listed = reg
            .execute(&ctx, &call("list_directory", json!({"path": "notes"})), "web", "u")
            .await;
        assert!(listed.content.contains("today.md"));
    }

    #[tokio::test]
    async fn append_mode_accumulates() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        for line in ["one\n", "two\n"] {
            reg.execute(
                &ctx,
                &call(
                    "write_file",
                    json!({"path": "log.txt", "content": line, "append": true}),
                ),
                "web",
                "u",
            )
            .await;
        }
        let read = reg
            .execute(&ctx, &call("read_file", json!({"path": "log.txt"})), "web", "u")
            .await;
        assert_eq!(read.content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn path_escape_is_blocked() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(
                &ctx,
                &call("read_file", json!({"path": "../../etc/passwd"})),
                "web",
                "u",
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("Security violation"));
    }

    #[tokio::test]
    async fn executable_extensions_are_refused() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        for name in ["payload.exe", "script.PS1", "run.bat"] {
            let result = reg
                .execute(
                    &ctx,
                    &call("write_file", json!({"path": name, "content": "x"})),
                    "web",
                    "u",
                )
                .await;
            assert!(result.is_error, "should refuse {}", name);
            assert!(!tmp.path().join(name).exists());
        }
    }

    #[tokio::test]
    async fn list_defaults_to_workspace_root() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        std::fs::write(tmp.path().join("root.txt"), "x").unwrap();
        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(&ctx, &call("list_directory", json!({})), "web", "u")
            .await;
        assert!(result.content.contains("root.txt"));
    }
}
