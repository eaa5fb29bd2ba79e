use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const TASKS_DIR: &str = "tasks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    WaitingApproval,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::WaitingApproval => "waiting_approval",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "waiting_approval" => Some(TaskStatus::WaitingApproval),
            "paused" => Some(TaskStatus::Paused),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl TaskPriority {
    /// Ordering key: critical first.
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(StepStatus::Pending),
            "running" => Some(StepStatus::Running),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub title: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress: u8,
    pub steps: Vec<TaskStep>,
    pub current_step_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source_channel: String,
    pub source_user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    pub usage: TaskUsage,
    pub scratchpad: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub parent_id: Option<String>,
    pub title: String,
    pub description: String,
    pub priority: Option<TaskPriority>,
    pub source_channel: String,
    pub source_user: String,
    pub provider_override: Option<String>,
    pub model_override: Option<String>,
    pub tags: Vec<String>,
}

/// Persistent task queue: one JSON document per task under `tasks/`, plus an
/// in-memory index. Every mutator persists synchronously before returning;
/// writes go through a temp file + rename.
pub struct TaskStore {
    dir: PathBuf,
    index: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    /// Load all task documents. Tasks found `running` were interrupted by a
    /// crash or shutdown and are re-marked `paused`.
    pub fn open(workspace: &std::path::Path) -> Result<Self> {
        let dir = workspace.join(TASKS_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create task directory {:?}", dir))?;

        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("skipping unreadable task file {:?}: {}", path, e);
                    continue;
                }
            };
            match serde_json::from_str::<Task>(&text) {
                Ok(task) => {
                    index.insert(task.id.clone(), task);
                }
                Err(e) => warn!("skipping corrupt task file {:?}: {}", path, e),
            }
        }

        let store = Self {
            dir,
            index: RwLock::new(index),
        };

        let interrupted: Vec<String> = {
            let index = store.index.read().unwrap();
            index
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .map(|t| t.id.clone())
                .collect()
        };
        for id in interrupted {
            info!("task {} was running at shutdown, marking paused", id);
            store.update_status(&id, TaskStatus::Paused, None, None, None)?;
        }

        Ok(store)
    }

    pub fn create(&self, new: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            parent_id: new.parent_id,
            title: new.title,
            description: new.description,
            status: TaskStatus::Pending,
            priority: new.priority.unwrap_or(TaskPriority::Normal),
            progress: 0,
            steps: Vec::new(),
            current_step_index: 0,
            result: None,
            error: None,
            source_channel: new.source_channel,
            source_user: new.source_user,
            provider_override: new.provider_override,
            model_override: new.model_override,
            usage: TaskUsage::default(),
            scratchpad: String::new(),
            tags: new.tags,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.persist(&task)?;
        self.index
            .write()
            .unwrap()
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.index.read().unwrap().get(id).cloned()
    }

    /// Resolve a task by id prefix (chat commands address tasks this way).
    pub fn get_by_prefix(&self, prefix: &str) -> Option<Task> {
        let index = self.index.read().unwrap();
        let mut matches = index.values().filter(|t| t.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Some(task.clone()),
            _ => None,
        }
    }

    pub fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        progress: Option<u8>,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<Task> {
        self.mutate(id, |task| {
            task.status = status;
            if let Some(p) = progress {
                task.progress = p.min(100);
            }
            if status == TaskStatus::Completed {
                task.progress = 100;
            }
            if let Some(r) = result {
                task.result = Some(r);
            }
            if let Some(e) = error {
                task.error = Some(e);
            }
            task.completed_at = if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
                Some(Utc::now())
            } else {
                None
            };
        })
    }

    pub fn add_step(&self, id: &str, title: &str) -> Result<Task> {
        let title = title.to_string();
        self.mutate(id, move |task| {
            task.steps.push(TaskStep {
                title,
                status: StepStatus::Pending,
                result: None,
            });
        })
    }

    pub fn update_step(
        &self,
        id: &str,
        step_index: usize,
        status: StepStatus,
        result: Option<String>,
    ) -> Result<Task> {
        {
            let index = self.index.read().unwrap();
            let task = index
                .get(id)
                .ok_or_else(|| anyhow::anyhow!("task not found: {}", id))?;
            if step_index >= task.steps.len() {
                anyhow::bail!(
                    "step {} out of range for task {} ({} steps)",
                    step_index,
                    id,
                    task.steps.len()
                );
            }
        }
        self.mutate(id, move |task| {
            task.steps[step_index].status = status;
            task.steps[step_index].result = result;
            if status == StepStatus::Completed {
                task.current_step_index = (step_index + 1).min(task.steps.len());
            }
            // Progress re-derives from step completion when steps exist, and
            // status follows it: all steps done means the task is done, and
            // re-opening a step re-opens a step-completed task.
            let done = task
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count();
            task.progress = ((done * 100) / task.steps.len()) as u8;
            if done == task.steps.len() {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
            } else if task.status == TaskStatus::Completed {
                task.status = TaskStatus::Running;
                task.completed_at = None;
            }
        })
    }

    pub fn add_usage(&self, id: &str, input_tokens: u64, output_tokens: u64, cost: f64) -> Result<Task> {
        self.mutate(id, move |task| {
            task.usage.input_tokens += input_tokens;
            task.usage.output_tokens += output_tokens;
            task.usage.cost += cost;
        })
    }

    pub fn append_scratchpad(&self, id: &str, note: &str) -> Result<Task> {
        let line = format!("[{}] {}\n", Utc::now().format("%H:%M:%S"), note);
        self.mutate(id, move |task| {
            task.scratchpad.push_str(&line);
        })
    }

    pub fn list_by_status(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let index = self.index.read().unwrap();
        let mut tasks: Vec<Task> = index
            .values()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub fn list_subtasks(&self, parent_id: &str) -> Vec<Task> {
        let index = self.index.read().unwrap();
        let mut tasks: Vec<Task> = index
            .values()
            .filter(|t| t.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Highest-priority, oldest pending task.
    pub fn next_pending(&self) -> Option<Task> {
        let index = self.index.read().unwrap();
        index
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| (t.priority.rank(), t.created_at))
            .cloned()
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.index.write().unwrap().remove(id).is_some();
        if removed {
            let path = self.path_for(id);
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("cannot delete task file {:?}", path))?;
            }
        }
        Ok(removed)
    }

    pub fn all(&self) -> Vec<Task> {
        self.list_by_status(None)
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut Task)) -> Result<Task> {
        let mut index = self.index.write().unwrap();
        let task = index
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("task not found: {}", id))?;
        f(task);
        task.updated_at = Utc::now();
        let snapshot = task.clone();
        drop(index);
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn persist(&self, task: &Task) -> Result<()> {
        let path = self.path_for(&task.id);
        let data = serde_json::to_string_pretty(task)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data.as_bytes()).with_context(|| format!("write {:?}", tmp))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("rename into {:?}", path))?;
        Ok(())
    }
}
