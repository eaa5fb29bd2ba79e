use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::events::{publish, AgentEvent, EventBus};

const APPROVALS_DIR: &str = "approvals";
const DEFAULT_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRisk {
    Low,
    Medium,
    High,
    Critical,
}

impl ApprovalRisk {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalRisk::Low => "low",
            ApprovalRisk::Medium => "medium",
            ApprovalRisk::High => "high",
            ApprovalRisk::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ApprovalStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub tool: String,
    pub input: Value,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub description: String,
    pub action: ProposedAction,
    pub risk: ApprovalRisk,
    pub risk_reason: String,
    pub status: ApprovalStatus,
    pub channel: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

pub struct NewApproval {
    pub task_id: Option<String>,
    pub description: String,
    pub action: ProposedAction,
    pub risk: ApprovalRisk,
    pub risk_reason: String,
    pub channel: String,
    pub user: String,
}

/// Suspends an in-flight tool call until a human resolves it on any surface
/// (chat command, admin API, in-process call). A single resolver wakes at
/// most one waiting future; resolutions are idempotent and terminal.
pub struct ApprovalBroker {
    dir: PathBuf,
    index: Mutex<HashMap<String, ApprovalRequest>>,
    waiters: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    events: EventBus,
    ttl: chrono::Duration,
}

impl ApprovalBroker {
    pub fn open(workspace: &std::path::Path, events: EventBus) -> Result<Arc<Self>> {
        let dir = workspace.join(APPROVALS_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create approvals directory {:?}", dir))?;

        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_json::from_str::<ApprovalRequest>(&t).ok())
            {
                Some(req) => {
                    index.insert(req.id.clone(), req);
                }
                None => warn!("skipping corrupt approval file {:?}", path),
            }
        }

        let broker = Arc::new(Self {
            dir,
            index: Mutex::new(index),
            waiters: Mutex::new(HashMap::new()),
            events,
            ttl: chrono::Duration::minutes(DEFAULT_TTL_MINUTES),
        });

        // Any approval still pending past its deadline expired while we were
        // down; an interrupted worker that resumes treats expiry as rejected.
        let stale: Vec<String> = {
            let index = broker.index.lock().unwrap();
            let now = Utc::now();
            index
                .values()
                .filter(|r| r.status == ApprovalStatus::Pending && r.expires_at <= now)
                .map(|r| r.id.clone())
                .collect()
        };
        for id in stale {
            info!("approval {} expired during downtime", id);
            broker.finish(&id, ApprovalStatus::Expired, "system:startup")?;
        }

        Ok(broker)
    }

    /// Create a pending approval and return it with a future that resolves
    /// to true on approval, false on rejection or expiry.
    pub fn request(
        self: &Arc<Self>,
        new: NewApproval,
    ) -> Result<(ApprovalRequest, oneshot::Receiver<bool>)> {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            task_id: new.task_id,
            description: new.description,
            action: new.action,
            risk: new.risk,
            risk_reason: new.risk_reason,
            status: ApprovalStatus::Pending,
            channel: new.channel,
            user: new.user,
            created_at: now,
            expires_at: now + self.ttl,
            resolved_at: None,
            resolved_by: None,
        };

        self.persist(&request)?;
        self.index
            .lock()
            .unwrap()
            .insert(request.id.clone(), request.clone());

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(request.id.clone(), tx);

        publish(
            &self.events,
            AgentEvent::ApprovalRequested {
                id: request.id.clone(),
                description: request.description.clone(),
                risk: request.risk.as_str().to_string(),
            },
        );

        // Single-shot expiry timer.
        let broker = Arc::clone(self);
        let id = request.id.clone();
        let ttl = Duration::from_secs((self.ttl.num_seconds().max(0)) as u64);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = broker.finish(&id, ApprovalStatus::Expired, "system:timeout") {
                warn!("approval expiry for {} failed: {}", id, e);
            }
        });

        Ok((request, rx))
    }

    /// Resolve by id prefix (the chat-command surface). Ambiguous or unknown
    /// prefixes are errors.
    pub fn resolve_prefix(&self, prefix: &str, approve: bool, resolver: &str) -> Result<ApprovalRequest> {
        let id = {
            let index = self.index.lock().unwrap();
            let mut matches = index
                .values()
                .filter(|r| r.status == ApprovalStatus::Pending && r.id.starts_with(prefix));
            let first = matches
                .next()
                .ok_or_else(|| anyhow::anyhow!("no pending approval matches '{}'", prefix))?;
            if matches.next().is_some() {
                anyhow::bail!("approval prefix '{}' is ambiguous", prefix);
            }
            first.id.clone()
        };
        let status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.finish(&id, status, resolver)
    }

    /// Resolve by full id (admin API and in-process surfaces). Idempotent:
    /// resolving an already-terminal request returns it unchanged.
    pub fn resolve(&self, id: &str, approve: bool, resolver: &str) -> Result<ApprovalRequest> {
        let status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.finish(id, status, resolver)
    }

    pub fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.index.lock().unwrap().get(id).cloned()
    }

    pub fn pending_for(&self, channel: &str, user: &str) -> Vec<ApprovalRequest> {
        let index = self.index.lock().unwrap();
        let mut out: Vec<ApprovalRequest> = index
            .values()
            .filter(|r| {
                r.status == ApprovalStatus::Pending && r.channel == channel && r.user == user
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn all(&self) -> Vec<ApprovalRequest> {
        let mut out: Vec<ApprovalRequest> =
            self.index.lock().unwrap().values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    fn finish(&self, id: &str, status: ApprovalStatus, resolver: &str) -> Result<ApprovalRequest> {
        let request = {
            let mut index = self.index.lock().unwrap();
            let request = index
                .get_mut(id)
                .ok_or_else(|| anyhow::anyhow!("approval not found: {}", id))?;
            if request.status.is_terminal() {
                return Ok(request.clone());
            }
            request.status = status;
            request.resolved_at = Some(Utc::now());
            request.resolved_by = Some(resolver.to_string());
            request.clone()
        };
        self.persist(&request)?;

        if let Some(tx) = self.waiters.lock().unwrap().remove(id) {
            let _ = tx.send(status == ApprovalStatus::Approved);
        }

        publish(
            &self.events,
            AgentEvent::ApprovalResolved {
                id: id.to_string(),
                status: status.as_str().to_string(),
                resolver: resolver.to_string(),
            },
        );
        Ok(request)
    }

    fn persist(&self, request: &ApprovalRequest) -> Result<()> {
        let path = self.dir.join(format!("{}.json", request.id));
        let data = serde_json::to_string_pretty(request)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data.as_bytes()).with_context(|| format!("write {:?}", tmp))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("rename into {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::event_bus;
    use tempfile::tempdir;

    fn new_approval(tool: &str) -> NewApproval {
        NewApproval {
            task_id: None,
            description: format!("run {}", tool),
            action: ProposedAction {
                tool: tool.to_string(),
                input: serde_json::json!({"command": "uptime"}),
                reasoning: "user asked".to_string(),
            },
            risk: ApprovalRisk::High,
            risk_reason: "executes on the host".to_string(),
            channel: "telegram".to_string(),
            user: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn approval_resolves_waiting_future_true() {
        let tmp = tempdir().unwrap();
        let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
        let (req, rx) = broker.request(new_approval("run_shell")).unwrap();

        let resolved = broker
            .resolve_prefix(&req.id[..8], true, "telegram:alice")
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("telegram:alice"));
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn rejection_resolves_waiting_future_false() {
        let tmp = tempdir().unwrap();
        let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
        let (req, rx) = broker.request(new_approval("email_send")).unwrap();
        broker.resolve(&req.id, false, "dashboard").unwrap();
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let tmp = tempdir().unwrap();
        let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
        let (req, _rx) = broker.request(new_approval("run_shell")).unwrap();

        let first = broker.resolve(&req.id, true, "a").unwrap();
        let second = broker.resolve(&req.id, false, "b").unwrap();
        assert_eq!(first.status, ApprovalStatus::Approved);
        assert_eq!(second.status, ApprovalStatus::Approved);
        assert_eq!(second.resolved_by.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn pending_listing_is_scoped_to_channel_and_user() {
        let tmp = tempdir().unwrap();
        let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
        broker.request(new_approval("run_shell")).unwrap();
        let mut other = new_approval("email_send");
        other.user = "bob".to_string();
        broker.request(other).unwrap();

        assert_eq!(broker.pending_for("telegram", "alice").len(), 1);
        assert_eq!(broker.pending_for("telegram", "bob").len(), 1);
        assert!(broker.pending_for("discord", "alice").is_empty());
    }

    #[tokio::test]
    async fn ambiguous_prefix_is_an_error() {
        let tmp = tempdir().unwrap();
        let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
        broker.request(new_approval("a")).unwrap();
        broker.request(new_approval("b")).unwrap();
        assert!(broker.resolve_prefix("", true, "x").is_err());
        assert!(broker.resolve_prefix("zzzz", true, "x").is_err());
    }

    #[tokio::test]
    async fn stale_pending_approvals_expire_on_startup() {
        let tmp = tempdir().unwrap();
        let id = {
            let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
            let (req, _rx) = broker.request(new_approval("run_shell")).unwrap();
            // Rewrite the document with an expiry in the past, simulating a
            // request left over from a previous run.
            let mut stale = broker.get(&req.id).unwrap();
            stale.expires_at = Utc::now() - chrono::Duration::minutes(5);
            broker.persist(&stale).unwrap();
            req.id
        };
        let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
        let req = broker.get(&id).unwrap();
        assert_eq!(req.status, ApprovalStatus::Expired);
        assert_eq!(req.resolved_by.as_deref(), Some("system:startup"));
    }

    #[tokio::test]
    async fn documents_land_on_disk() {
        let tmp = tempdir().unwrap();
        let broker = ApprovalBroker::open(tmp.path(), event_bus()).unwrap();
        let (req, _rx) = broker.request(new_approval("run_shell")).unwrap();
        let path = tmp
            .path()
            .join(APPROVALS_DIR)
            .join(format!("{}.json", req.id));
        assert!(path.exists());
        let on_disk: ApprovalRequest =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(on_disk.status, ApprovalStatus::Pending);
        assert_eq!(on_disk.action.tool, "run_shell");
    }
}
