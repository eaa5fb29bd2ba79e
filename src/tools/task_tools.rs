use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{opt_bool, opt_str, opt_u64, req_str, OrchestrationRequest, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::core::orchestrator::should_orchestrate;
use crate::core::tasks::{NewTask, StepStatus, TaskPriority, TaskStatus};

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Tasks,
        "create_task",
        "Create a tracked task. Complex descriptions are decomposed into a multi-agent plan \
         and executed in the background.",
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "description": {"type": "string"},
                "priority": {"type": "string", "enum": ["critical", "high", "normal", "low"]},
                "orchestrate": {"type": "boolean", "description": "Force multi-agent orchestration"}
            },
            "required": ["description"]
        }),
        Arc::new(CreateTask),
    );
    reg.register(
        ToolCategory::Tasks,
        "list_tasks",
        "List recent tasks with status and progress.",
        json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "description": "Optional status filter"}
            }
        }),
        Arc::new(ListTasks),
    );
    reg.register(
        ToolCategory::Tasks,
        "list_approvals",
        "List approval requests pending a human decision.",
        json!({"type": "object", "properties": {}}),
        Arc::new(ListApprovals),
    );
    reg.register(
        ToolCategory::Tasks,
        "resolve_approval",
        "Resolve a pending approval in-process (agent self-approval is only honored for low-risk actions).",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Approval id or unique prefix"},
                "approve": {"type": "boolean"}
            },
            "required": ["id", "approve"]
        }),
        Arc::new(ResolveApproval),
    );
    reg.register(
        ToolCategory::Tasks,
        "update_task",
        "Update a task's status, progress, result or scratchpad.",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Task id or unique prefix"},
                "status": {"type": "string"},
                "progress": {"type": "integer"},
                "result": {"type": "string"},
                "note": {"type": "string", "description": "Appended to the scratchpad"}
            },
            "required": ["id"]
        }),
        Arc::new(UpdateTask),
    );
    reg.register(
        ToolCategory::Tasks,
        "add_task_step",
        "Append a step to a task's plan. Once a task has steps, its progress \
         is derived from step completion.",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Task id or unique prefix"},
                "title": {"type": "string"}
            },
            "required": ["id", "title"]
        }),
        Arc::new(AddTaskStep),
    );
    reg.register(
        ToolCategory::Tasks,
        "update_task_step",
        "Update one step of a task (by zero-based index). Completing the last \
         open step completes the task.",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Task id or unique prefix"},
                "step": {"type": "integer", "description": "Zero-based step index"},
                "status": {"type": "string", "enum": ["pending", "running", "completed", "failed"]},
                "result": {"type": "string"}
            },
            "required": ["id", "step", "status"]
        }),
        Arc::new(UpdateTaskStep),
    );
}

fn find_task(ctx: &ToolContext, id_or_prefix: &str) -> Result<crate::core::tasks::Task, AgentError> {
    ctx.tasks
        .get(id_or_prefix)
        .or_else(|| ctx.tasks.get_by_prefix(id_or_prefix))
        .ok_or_else(|| AgentError::validation(format!("task '{}' not found", id_or_prefix)))
}

struct CreateTask;

#[async_trait]
impl ToolHandler for CreateTask {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let description = req_str(&args, "description")?;
        let title = opt_str(&args, "title").unwrap_or(description);
        let title: String = title.chars().take(80).collect();
        let priority = opt_str(&args, "priority").and_then(|p| match p {
            "critical" => Some(TaskPriority::Critical),
            "high" => Some(TaskPriority::High),
            "normal" => Some(TaskPriority::Normal),
            "low" => Some(TaskPriority::Low),
            _ => None,
        });

        let task = ctx
            .tasks
            .create(NewTask {
                title,
                description: description.to_string(),
                priority,
                source_channel: opt_str(&args, "channel").unwrap_or("internal").to_string(),
                source_user: opt_str(&args, "user").unwrap_or("agent").to_string(),
                ..Default::default()
            })
            .map_err(|e| AgentError::transport(e.to_string()))?;

        let orchestrate =
            opt_bool(&args, "orchestrate").unwrap_or(false) || should_orchestrate(description);
        if orchestrate {
            info!("task {} routed to orchestrator", task.id);
            ctx.orchestrate_tx
                .send(OrchestrationRequest {
                    task_id: task.id.clone(),
                    objective: description.to_string(),
                })
                .await
                .map_err(|_| AgentError::transport("orchestrator is not running"))?;
            Ok(format!(
                "task {} created; orchestration started in the background",
                task.id
            ))
        } else {
            Ok(format!("task {} created (pending)", task.id))
        }
    }
}

struct AddTaskStep;

#[async_trait]
impl ToolHandler for AddTaskStep {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let task = find_task(ctx, req_str(&args, "id")?)?;
        let title = req_str(&args, "title")?;
        let updated = ctx
            .tasks
            .add_step(&task.id, title)
            .map_err(|e| AgentError::transport(e.to_string()))?;
        Ok(format!(
            "step {} added to task {} ({} steps total)",
            updated.steps.len() - 1,
            &updated.id[..8],
            updated.steps.len()
        ))
    }
}

struct UpdateTaskStep;

#[async_trait]
impl ToolHandler for UpdateTaskStep {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let task = find_task(ctx, req_str(&args, "id")?)?;
        let step = opt_u64(&args, "step")
            .ok_or_else(|| AgentError::validation("missing required integer 'step'"))?
            as usize;
        let status = StepStatus::from_str(req_str(&args, "status")?)
            .ok_or_else(|| AgentError::validation("unknown step status"))?;
        let result = opt_str(&args, "result").map(|s| s.to_string());

        let updated = ctx
            .tasks
            .update_step(&task.id, step, status, result)
            .map_err(|e| AgentError::validation(e.to_string()))?;
        Ok(format!(
            "task {} is [{}] at {}% ({}/{} steps done)",
            &updated.id[..8],
            updated.status.as_str(),
            updated.progress,
            updated
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count(),
            updated.steps.len()
        ))
    }
}

struct ListApprovals;

#[async_trait]
impl ToolHandler for ListApprovals {
    async fn run(&self, ctx: &ToolContext, _args: Value) -> Result<String, AgentError> {
        let pending: Vec<_> = ctx
            .approvals
            .all()
            .into_iter()
            .filter(|r| r.status == crate::core::approvals::ApprovalStatus::Pending)
            .collect();
        if pending.is_empty() {
            return Ok("no pending approvals".to_string());
        }
        let mut out = String::new();
        for req in pending {
            out.push_str(&format!(
                "{} [{}] {} (tool: {})\n",
                &req.id[..8],
                req.risk.as_str(),
                req.description,
                req.action.tool
            ));
        }
        Ok(out)
    }
}

struct ResolveApproval;

#[async_trait]
impl ToolHandler for ResolveApproval {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let prefix = req_str(&args, "id")?;
        let approve = opt_bool(&args, "approve")
            .ok_or_else(|| AgentError::validation("missing required boolean 'approve'"))?;

        // Self-approval of its own dangerous actions would defeat the
        // broker; only low-risk requests may be resolved in-process.
        if approve {
            let target = ctx
                .approvals
                .all()
                .into_iter()
                .find(|r| r.id.starts_with(prefix))
                .ok_or_else(|| AgentError::validation("approval not found"))?;
            if target.risk != crate::core::approvals::ApprovalRisk::Low {
                return Err(AgentError::security(format!(
                    "self-approval refused: '{}' is {} risk and needs a human",
                    target.action.tool,
                    target.risk.as_str()
                )));
            }
        }

        let resolved = ctx
            .approvals
            .resolve_prefix(prefix, approve, "agent:self")
            .map_err(|e| AgentError::validation(e.to_string()))?;
        Ok(format!(
            "approval {} is now {}",
            &resolved.id[..8],
            resolved.status.as_str()
        ))
    }
}

struct ListTasks;

#[async_trait]
impl ToolHandler for ListTasks {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let status = opt_str(&args, "status")
            .map(|s| {
                TaskStatus::from_str(s)
                    .ok_or_else(|| AgentError::validation(format!("unknown status '{}'", s)))
            })
            .transpose()?;

        let tasks = ctx.tasks.list_by_status(status);
        if tasks.is_empty() {
            return Ok("no tasks".to_string());
        }
        let mut out = String::new();
        for task in tasks.iter().take(15) {
            out.push_str(&format!(
                "{} [{}] {}% ${:.4} - {}\n",
                &task.id[..8.min(task.id.len())],
                task.status.as_str(),
                task.progress,
                task.usage.cost,
                task.title
            ));
        }
        Ok(out)
    }
}

struct UpdateTask;

#[async_trait]
impl ToolHandler for UpdateTask {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let task = find_task(ctx, req_str(&args, "id")?)?;

        if let Some(note) = opt_str(&args, "note") {
            ctx.tasks
                .append_scratchpad(&task.id, note)
                .map_err(|e| AgentError::transport(e.to_string()))?;
        }

        if args.get("status").is_some() || args.get("progress").is_some() || args.get("result").is_some() {
            let status = match opt_str(&args, "status") {
                Some(s) => TaskStatus::from_str(s)
                    .ok_or_else(|| AgentError::validation(format!("unknown status '{}'", s)))?,
                None => task.status,
            };
            let progress = args
                .get("progress")
                .and_then(|v| v.as_u64())
                .map(|p| p.min(100) as u8);
            let result = opt_str(&args, "result").map(|s| s.to_string());
            ctx.tasks
                .update_status(&task.id, status, progress, result, None)
                .map_err(|e| AgentError::transport(e.to_string()))?;
        }

        let updated = ctx.tasks.get(&task.id).unwrap_or(task);
        Ok(format!(
            "task {} is now [{}] at {}%",
            &updated.id[..8],
            updated.status.as_str(),
            updated.progress
        ))
    }
}
