use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::llm::{ModelTier, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Researcher,
    Coder,
    Writer,
    Reviewer,
    Executor,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Researcher => "researcher",
            AgentRole::Coder => "coder",
            AgentRole::Writer => "writer",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Executor => "executor",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "researcher" => Some(AgentRole::Researcher),
            "coder" => Some(AgentRole::Coder),
            "writer" => Some(AgentRole::Writer),
            "reviewer" => Some(AgentRole::Reviewer),
            "executor" => Some(AgentRole::Executor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSubtask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub role: AgentRole,
    pub tier: Option<ModelTier>,
    /// Subtasks sharing a label run concurrently; labels execute in
    /// lexicographic order. Unlabelled subtasks run sequentially last.
    pub parallel_group: Option<String>,
    pub complexity: u8,
    pub requires_privacy: bool,
    pub status: SubtaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
}

impl PlannedSubtask {
    pub fn new(title: &str, description: &str, role: AgentRole) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            role,
            tier: None,
            parallel_group: None,
            complexity: 5,
            requires_privacy: false,
            status: SubtaskStatus::Pending,
            result: None,
            assigned_agent: None,
        }
    }
}

/// A decomposed objective. The dependency map is keyed by subtask id and is
/// acyclic by construction (planner output referencing unknown or forward
/// titles is dropped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub parent_task_id: String,
    pub objective: String,
    pub subtasks: Vec<PlannedSubtask>,
    pub dependencies: HashMap<String, Vec<String>>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(parent_task_id: &str, objective: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_task_id: parent_task_id.to_string(),
            objective: objective.to_string(),
            subtasks: Vec::new(),
            dependencies: HashMap::new(),
            status: PlanStatus::Planning,
            created_at: Utc::now(),
        }
    }

    /// Single balanced-tier plan used when the planner's JSON cannot be
    /// parsed.
    pub fn degraded(parent_task_id: &str, objective: &str) -> Self {
        let mut plan = Self::new(parent_task_id, objective);
        let mut subtask = PlannedSubtask::new("Complete the task", objective, AgentRole::Executor);
        subtask.tier = Some(ModelTier::Balanced);
        plan.subtasks.push(subtask);
        plan
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentStatus {
    Idle,
    Busy,
    Error,
    Stopped,
}

/// Ephemeral per-subtask worker record, kept for the admin snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SubAgent {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub provider: String,
    pub model: String,
    pub status: SubAgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    /// Why the router picked this model.
    pub rationale: String,
    pub usage: TokenUsage,
}

/// Process-global index of sub-agents spawned by orchestration runs.
pub struct AgentRegistry {
    inner: Mutex<Vec<SubAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn spawn(
        &self,
        name: &str,
        role: AgentRole,
        provider: &str,
        model: &str,
        task_id: &str,
        rationale: &str,
    ) -> String {
        let agent = SubAgent {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            role,
            provider: provider.to_string(),
            model: model.to_string(),
            status: SubAgentStatus::Busy,
            current_task_id: Some(task_id.to_string()),
            rationale: rationale.to_string(),
            usage: TokenUsage::default(),
        };
        let id = agent.id.clone();
        self.inner.lock().unwrap().push(agent);
        id
    }

    pub fn finish(&self, id: &str, status: SubAgentStatus, usage: TokenUsage) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(agent) = inner.iter_mut().find(|a| a.id == id) {
            agent.status = status;
            agent.current_task_id = None;
            agent.usage = usage;
        }
    }

    pub fn snapshot(&self) -> Vec<SubAgent> {
        self.inner.lock().unwrap().clone()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
