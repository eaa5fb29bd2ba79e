use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::error;

const MAX_INPUT_PREVIEW: usize = 1000;
const MAX_RESULT_PREVIEW: usize = 500;

/// One append-only JSONL file per calendar date under `logs/`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub user: String,
    pub channel: String,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, channel: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            action: action.into(),
            tool: None,
            input: None,
            result_preview: None,
            blocked: false,
            reason: None,
            user: user.into(),
            channel: channel.into(),
        }
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn input(mut self, input: &str) -> Self {
        self.input = Some(truncate(input, MAX_INPUT_PREVIEW));
        self
    }

    pub fn result(mut self, result: &str) -> Self {
        self.result_preview = Some(truncate(result, MAX_RESULT_PREVIEW));
        self
    }

    pub fn blocked(mut self, reason: impl Into<String>) -> Self {
        self.blocked = true;
        self.reason = Some(reason.into());
        self
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}

struct OpenLog {
    date: String,
    file: File,
}

pub struct AuditLog {
    dir: PathBuf,
    enabled: bool,
    current: Mutex<Option<OpenLog>>,
}

impl AuditLog {
    /// Open (or create) the log directory. Failure here is fatal at startup.
    pub fn open(workspace: &std::path::Path, enabled: bool) -> Result<Self> {
        let dir = workspace.join("logs");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create audit log directory {:?}", dir))?;
        let log = Self {
            dir,
            enabled,
            current: Mutex::new(None),
        };
        if enabled {
            // Prove the day file is writable now rather than mid-request.
            log.with_file(|_| Ok(()))?;
        }
        Ok(log)
    }

    /// Append one entry. Blocked entries are mirrored to stderr.
    pub fn record(&self, entry: AuditEntry) {
        if entry.blocked {
            error!(
                action = %entry.action,
                tool = entry.tool.as_deref().unwrap_or("-"),
                reason = entry.reason.as_deref().unwrap_or("-"),
                "audit: blocked"
            );
        }
        if !self.enabled {
            return;
        }
        let line = match serde_json::to_string(&entry) {
            Ok(l) => l,
            Err(e) => {
                error!("audit serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.with_file(|f| {
            writeln!(f, "{}", line)?;
            Ok(())
        }) {
            error!("audit write failed: {}", e);
        }
    }

    /// List the dates that have a log file, newest first.
    pub fn dates(&self) -> Vec<String> {
        let mut out: Vec<String> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        name.strip_prefix("audit-")
                            .and_then(|n| n.strip_suffix(".jsonl"))
                            .map(|d| d.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort();
        out.reverse();
        out
    }

    /// Read the raw JSONL entries for one date (today when `None`).
    pub fn read_day(&self, date: Option<&str>) -> Result<Vec<serde_json::Value>> {
        let date = date
            .map(|d| d.to_string())
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
        let path = self.dir.join(format!("audit-{}.jsonl", date));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(text
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    pub fn flush(&self) {
        if let Some(open) = self.current.lock().unwrap().as_mut() {
            let _ = open.file.flush();
        }
    }

    fn with_file(&self, f: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut guard = self.current.lock().unwrap();
        let needs_roll = guard.as_ref().map(|o| o.date != today).unwrap_or(true);
        if needs_roll {
            let path = self.dir.join(format!("audit-{}.jsonl", today));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot open audit log {:?}", path))?;
            *guard = Some(OpenLog { date: today, file });
        }
        let open = guard.as_mut().unwrap();
        f(&mut open.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_entries_as_jsonl_per_day() {
        let tmp = tempdir().unwrap();
        let log = AuditLog::open(tmp.path(), true).unwrap();

        log.record(
            AuditEntry::new("tool_call", "telegram", "alice")
                .tool("run_shell")
                .input("ls -la")
                .result("total 12"),
        );
        log.record(
            AuditEntry::new("tool_call", "telegram", "alice")
                .tool("run_shell")
                .input("rm -rf /")
                .blocked("recursive delete outside the workspace"),
        );
        log.flush();

        let entries = log.read_day(None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["blocked"], false);
        assert_eq!(entries[1]["blocked"], true);
        assert_eq!(
            entries[1]["reason"],
            "recursive delete outside the workspace"
        );

        let dates = log.dates();
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0], Utc::now().format("%Y-%m-%d").to_string());
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let tmp = tempdir().unwrap();
        let log = AuditLog::open(tmp.path(), false).unwrap();
        log.record(AuditEntry::new("tool_call", "web", "bob"));
        assert!(log.read_day(None).unwrap().is_empty());
        assert!(log.dates().is_empty());
    }

    #[test]
    fn long_previews_are_truncated() {
        let entry = AuditEntry::new("x", "c", "u")
            .input(&"a".repeat(5000))
            .result(&"b".repeat(5000));
        assert!(entry.input.unwrap().chars().count() <= MAX_INPUT_PREVIEW + 1);
        assert!(entry.result_preview.unwrap().chars().count() <= MAX_RESULT_PREVIEW + 1);
    }

    #[test]
    fn read_day_for_unknown_date_is_empty() {
        let tmp = tempdir().unwrap();
        let log = AuditLog::open(tmp.path(), true).unwrap();
        assert!(log.read_day(Some("1999-01-01")).unwrap().is_empty());
    }
}
