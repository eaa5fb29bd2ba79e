mod calendar;
mod cron;
mod email_watch;
mod engine;
mod file_watch;
mod webhook;

pub use email_watch::{fetch_unseen_summaries, EmailSummary};
pub use engine::{TriggerDispatcher, TriggerEngine};
pub use webhook::WebhookServer;

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::core::errors::AgentError;

const TRIGGERS_FILE: &str = "triggers.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    FileWatch,
    Webhook,
    Cron,
    Calendar,
    EmailWatch,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::FileWatch => "file_watch",
            TriggerType::Webhook => "webhook",
            TriggerType::Cron => "cron",
            TriggerType::Calendar => "calendar",
            TriggerType::EmailWatch => "email_watch",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "file_watch" => Some(TriggerType::FileWatch),
            "webhook" => Some(TriggerType::Webhook),
            "cron" => Some(TriggerType::Cron),
            "calendar" => Some(TriggerType::Calendar),
            "email_watch" => Some(TriggerType::EmailWatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Message,
    Task,
}

/// What firing a trigger does: feed a message into the session loop, or
/// create a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerAction {
    pub kind: ActionKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub trigger_type: TriggerType,
    pub name: String,
    pub enabled: bool,
    /// Type-specific settings: watch path + filename regex, webhook path +
    /// secret, cron expression, iCal URL + poll interval, IMAP filters.
    pub config: Value,
    pub action: TriggerAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
}

pub struct NewTrigger {
    pub trigger_type: TriggerType,
    pub name: String,
    pub config: Value,
    pub action: TriggerAction,
}

/// Validate a standard 5-field cron expression. The scheduler re-parses it
/// when the trigger is armed; this catches malformed input at registration.
pub fn validate_cron_expr(expr: &str) -> Result<(), AgentError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(AgentError::validation(format!(
            "cron expression must have 5 fields, got {}",
            fields.len()
        )));
    }
    let ok = |f: &str| {
        !f.is_empty()
            && f.chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | '-' | ','))
    };
    if let Some(bad) = fields.iter().find(|f| !ok(f)) {
        return Err(AgentError::validation(format!(
            "invalid cron field '{}'",
            bad
        )));
    }
    Ok(())
}

fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Persistent trigger index: `triggers.json` rewritten whole on every change.
pub struct TriggerRegistry {
    path: PathBuf,
    inner: Mutex<Vec<Trigger>>,
}

impl TriggerRegistry {
    pub fn open(workspace: &std::path::Path) -> Result<Self> {
        let path = workspace.join(TRIGGERS_FILE);
        let triggers: Vec<Trigger> = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        info!("loaded {} triggers", triggers.len());
        Ok(Self {
            path,
            inner: Mutex::new(triggers),
        })
    }

    pub fn create(&self, new: NewTrigger) -> Result<Trigger, AgentError> {
        self.validate(&new)?;
        let trigger = Trigger {
            id: Uuid::new_v4().to_string(),
            trigger_type: new.trigger_type,
            name: new.name,
            enabled: true,
            config: new.config,
            action: new.action,
            last_triggered: None,
            fire_count: 0,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.push(trigger.clone());
        self.persist(&inner)
            .map_err(|e| AgentError::transport(e.to_string()))?;
        Ok(trigger)
    }

    fn validate(&self, new: &NewTrigger) -> Result<(), AgentError> {
        match new.trigger_type {
            TriggerType::Cron => {
                let expr = config_str(&new.config, "expression")
                    .ok_or_else(|| AgentError::validation("cron trigger needs config.expression"))?;
                validate_cron_expr(expr)
            }
            TriggerType::FileWatch => {
                config_str(&new.config, "path")
                    .ok_or_else(|| AgentError::validation("file_watch trigger needs config.path"))?;
                if let Some(pattern) = config_str(&new.config, "pattern") {
                    regex::Regex::new(pattern).map_err(|e| {
                        AgentError::validation(format!("invalid filename pattern: {}", e))
                    })?;
                }
                Ok(())
            }
            TriggerType::Webhook => {
                let path = config_str(&new.config, "path")
                    .ok_or_else(|| AgentError::validation("webhook trigger needs config.path"))?;
                if !path.starts_with('/') {
                    return Err(AgentError::validation("webhook path must start with '/'"));
                }
                Ok(())
            }
            TriggerType::Calendar => {
                config_str(&new.config, "url")
                    .ok_or_else(|| AgentError::validation("calendar trigger needs config.url"))?;
                Ok(())
            }
            TriggerType::EmailWatch => Ok(()),
        }
    }

    pub fn list(&self) -> Vec<Trigger> {
        self.inner.lock().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<Trigger> {
        self.inner.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    /// Flip enabled; returns the new state.
    pub fn toggle(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let trigger = inner
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("trigger not found: {}", id))?;
        trigger.enabled = !trigger.enabled;
        let enabled = trigger.enabled;
        self.persist(&inner)?;
        Ok(enabled)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|t| t.id != id);
        let removed = inner.len() != before;
        if removed {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    pub fn delete_by_name(&self, name: &str) -> Result<bool> {
        let id = self
            .inner
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id.clone());
        match id {
            Some(id) => self.delete(&id),
            None => Ok(false),
        }
    }

    /// Stamp a fire: bump the counter, set last_triggered, persist.
    pub fn record_fire(&self, id: &str) -> Result<Option<Trigger>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(trigger) = inner.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        trigger.fire_count += 1;
        trigger.last_triggered = Some(Utc::now());
        let snapshot = trigger.clone();
        self.persist(&inner)?;
        Ok(Some(snapshot))
    }

    /// Merge a patch into a trigger's config (email watermarks and similar
    /// engine-owned state).
    pub fn update_config(&self, id: &str, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let trigger = inner
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("trigger not found: {}", id))?;
        if !trigger.config.is_object() {
            trigger.config = Value::Object(Default::default());
        }
        trigger.config[key] = value;
        self.persist(&inner)?;
        Ok(())
    }

    fn persist(&self, triggers: &[Trigger]) -> Result<()> {
        let data = serde_json::to_string_pretty(triggers)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data.as_bytes()).with_context(|| format!("write {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename into {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn message_action() -> TriggerAction {
        TriggerAction {
            kind: ActionKind::Message,
            content: "check the build".to_string(),
            channel: Some("telegram".to_string()),
            user: Some("alice".to_string()),
        }
    }

    #[test]
    fn cron_expression_validation() {
        assert!(validate_cron_expr("*/5 * * * *").is_ok());
        assert!(validate_cron_expr("0 9 * * 1-5").is_ok());
        assert!(validate_cron_expr("0 9 * *").is_err());
        assert!(validate_cron_expr("0 9 * * * *").is_err());
        assert!(validate_cron_expr("a b c d e").is_err());
    }

    #[test]
    fn create_validates_per_type() {
        let tmp = tempdir().unwrap();
        let reg = TriggerRegistry::open(tmp.path()).unwrap();

        assert!(reg
            .create(NewTrigger {
                trigger_type: TriggerType::Cron,
                name: "nightly".into(),
                config: json!({"expression": "not a cron"}),
                action: message_action(),
            })
            .is_err());

        assert!(reg
            .create(NewTrigger {
                trigger_type: TriggerType::Webhook,
                name: "gh".into(),
                config: json!({"path": "no-leading-slash"}),
                action: message_action(),
            })
            .is_err());

        assert!(reg
            .create(NewTrigger {
                trigger_type: TriggerType::FileWatch,
                name: "docs".into(),
                config: json!({"path": "watched", "pattern": "("}),
                action: message_action(),
            })
            .is_err());

        let ok = reg
            .create(NewTrigger {
                trigger_type: TriggerType::Cron,
                name: "nightly".into(),
                config: json!({"expression": "0 3 * * *"}),
                action: message_action(),
            })
            .unwrap();
        assert!(ok.enabled);
        assert_eq!(ok.fire_count, 0);
    }

    #[test]
    fn registry_persists_whole_array() {
        let tmp = tempdir().unwrap();
        {
            let reg = TriggerRegistry::open(tmp.path()).unwrap();
            reg.create(NewTrigger {
                trigger_type: TriggerType::Webhook,
                name: "gh".into(),
                config: json!({"path": "/hooks/gh"}),
                action: message_action(),
            })
            .unwrap();
        }
        let reg = TriggerRegistry::open(tmp.path()).unwrap();
        let all = reg.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "gh");
    }

    #[test]
    fn fire_updates_counter_and_stamp() {
        let tmp = tempdir().unwrap();
        let reg = TriggerRegistry::open(tmp.path()).unwrap();
        let t = reg
            .create(NewTrigger {
                trigger_type: TriggerType::Cron,
                name: "tick".into(),
                config: json!({"expression": "* * * * *"}),
                action: message_action(),
            })
            .unwrap();

        reg.record_fire(&t.id).unwrap();
        let fired = reg.record_fire(&t.id).unwrap().unwrap();
        assert_eq!(fired.fire_count, 2);
        assert!(fired.last_triggered.is_some());
        assert!(reg.record_fire("missing").unwrap().is_none());
    }

    #[test]
    fn toggle_and_delete() {
        let tmp = tempdir().unwrap();
        let reg = TriggerRegistry::open(tmp.path()).unwrap();
        let t = reg
            .create(NewTrigger {
                trigger_type: TriggerType::Calendar,
                name: "cal".into(),
                config: json!({"url": "https://example.com/cal.ics"}),
                action: message_action(),
            })
            .unwrap();

        assert!(!reg.toggle(&t.id).unwrap());
        assert!(reg.toggle(&t.id).unwrap());
        assert!(reg.delete(&t.id).unwrap());
        assert!(!reg.delete(&t.id).unwrap());
    }

    #[test]
    fn config_updates_merge_watermarks() {
        let tmp = tempdir().unwrap();
        let reg = TriggerRegistry::open(tmp.path()).unwrap();
        let t = reg
            .create(NewTrigger {
                trigger_type: TriggerType::EmailWatch,
                name: "inbox".into(),
                config: json!({"from_contains": "boss@"}),
                action: message_action(),
            })
            .unwrap();
        reg.update_config(&t.id, "last_seen_uid", json!(4711)).unwrap();
        let got = reg.get(&t.id).unwrap();
        assert_eq!(got.config["last_seen_uid"], 4711);
        assert_eq!(got.config["from_contains"], "boss@");
    }
}
