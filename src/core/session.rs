use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::core::approvals::{NewApproval, ProposedAction};
use crate::core::events::{preview, publish, AgentEvent};
use crate::core::llm::{ChatTurn, LlmManager, ModelRoute, ToolCallRequest};
use crate::core::memory::ConversationThread;
use crate::core::settings::RuntimeSettings;
use crate::core::tasks::TaskStatus;
use crate::skills::SkillSet;
use crate::tools::{is_dangerous, risk_of, ToolContext, ToolRegistry, ToolResult};

pub const BUDGET_BANNER: &str =
    "Daily LLM budget exceeded. I'm pausing LLM work until the budget resets or is raised.";
pub const MAX_ITERATIONS_NOTICE: &str =
    "I hit the tool-call limit for a single turn. Stopping here; progress so far has been saved.";
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

const TRIGGER_PAYLOAD_MAX: usize = 3000;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub user: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Chat,
    Heartbeat,
    Trigger,
}

/// Per-turn overrides used by orchestrator workers and event-plane turns.
#[derive(Default)]
pub struct TurnOptions {
    /// Route override; the manager default otherwise.
    pub route: Option<ModelRoute>,
    /// Extra system-prompt section (worker role framing).
    pub system_extra: Option<String>,
    /// Tasks charged for this turn's usage (child and parent for workers).
    pub task_ids: Vec<String>,
}

/// The agentic loop that drives one conversational turn: LLM call, guarded
/// tool execution, repeat until the model stops asking for tools.
pub struct SessionLoop {
    pub ctx: Arc<ToolContext>,
    pub registry: Arc<ToolRegistry>,
    pub llm: Arc<LlmManager>,
    pub skills: Arc<SkillSet>,
}

impl SessionLoop {
    pub fn new(
        ctx: Arc<ToolContext>,
        registry: Arc<ToolRegistry>,
        llm: Arc<LlmManager>,
        skills: Arc<SkillSet>,
    ) -> Self {
        Self {
            ctx,
            registry,
            llm,
            skills,
        }
    }

    /// Entry point for channel messages. Returns the reply text, or `None`
    /// when the turn produced nothing to send.
    pub async fn handle_message(&self, msg: &InboundMessage) -> Result<Option<String>> {
        publish(
            &self.ctx.events,
            AgentEvent::MessageReceived {
                channel: msg.channel.clone(),
                username: msg.user.clone(),
                preview: preview(&msg.text, 80),
            },
        );

        // Chat commands bypass the LLM entirely.
        if let Some(reply) = self.handle_chat_command(msg) {
            return Ok(Some(reply));
        }

        if !self.ctx.cost.can_make_call() {
            return Ok(Some(BUDGET_BANNER.to_string()));
        }

        self.run_turn(
            &msg.channel,
            &msg.user,
            &msg.text,
            TurnKind::Chat,
            TurnOptions::default(),
        )
        .await
    }

    /// Heartbeat mode: synthetic review prompt; `HEARTBEAT_OK` suppresses
    /// the reply.
    pub async fn handle_heartbeat(&self, open_items: &[String]) -> Result<Option<String>> {
        if !self.ctx.cost.can_make_call() {
            warn!("heartbeat skipped: {}", crate::core::errors::AgentError::BudgetExhausted);
            return Ok(None);
        }
        let text = format!(
            "Heartbeat check. These checklist items are open:\n{}\n\
             Work on anything that needs doing now. If nothing needs attention, \
             respond with exactly {}.",
            open_items
                .iter()
                .map(|i| format!("- {}", i))
                .collect::<Vec<_>>()
                .join("\n"),
            HEARTBEAT_OK
        );
        self.run_turn("heartbeat", "system", &text, TurnKind::Heartbeat, TurnOptions::default())
            .await
    }

    /// Trigger mode: the trigger's identity, configured action, and a
    /// truncated payload become the synthetic user turn.
    pub async fn handle_trigger(
        &self,
        trigger: &crate::triggers::Trigger,
        payload: &serde_json::Value,
    ) -> Result<Option<String>> {
        if !self.ctx.cost.can_make_call() {
            warn!("trigger '{}' skipped: budget exhausted", trigger.name);
            return Ok(None);
        }
        let payload_text = preview(&payload.to_string(), TRIGGER_PAYLOAD_MAX);
        let text = format!(
            "Trigger '{}' ({}) fired.\nConfigured action: {}\nEvent payload:\n{}",
            trigger.name,
            trigger.trigger_type.as_str(),
            trigger.action.content,
            payload_text
        );
        let channel = trigger.action.channel.clone().unwrap_or_else(|| "trigger".to_string());
        let user = trigger.action.user.clone().unwrap_or_else(|| "system".to_string());
        self.run_turn(&channel, &user, &text, TurnKind::Trigger, TurnOptions::default())
            .await
    }

    /// The core loop. Public because orchestrator workers run it directly
    /// with route and prompt overrides.
    pub async fn run_turn(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        kind: TurnKind,
        options: TurnOptions,
    ) -> Result<Option<String>> {
        let settings = self.ctx.settings.get();
        let route = match options.route.clone().or_else(|| self.llm.default_route()) {
            Some(route) => route,
            None => {
                return Ok(Some(
                    "No LLM provider is configured. Set LLM_PROVIDER and an API key.".to_string(),
                ));
            }
        };

        let mut thread = self.ctx.memory.load_thread(channel, user).await?;
        let system_prompt = self
            .build_system_prompt(&settings, &thread, options.system_extra.as_deref())
            .await;
        thread.turns.push(ChatTurn::user(text));

        let tools = self.registry.definitions(&settings);
        let max_iterations = settings.max_tool_calls.max(1);

        for iteration in 0..max_iterations {
            if !self.ctx.cost.can_make_call() {
                self.ctx.memory.save_thread(&thread).await?;
                return Ok(Some(BUDGET_BANNER.to_string()));
            }

            let response = self
                .llm
                .complete(&route, &system_prompt, &thread.turns, &tools)
                .await?;

            // Usage lands in the accumulator before anything observes the
            // response.
            let cost = route.estimate_cost(response.usage);
            self.ctx.cost.track_usage(
                &route.model,
                response.usage.input_tokens,
                response.usage.output_tokens,
                cost,
            );
            for task_id in &options.task_ids {
                let _ = self.ctx.tasks.add_usage(
                    task_id,
                    response.usage.input_tokens,
                    response.usage.output_tokens,
                    cost,
                );
            }

            if response.tool_calls.is_empty() {
                let reply = response.content;
                thread.turns.push(ChatTurn::assistant(&reply));
                self.ctx.memory.save_thread(&thread).await?;

                if kind == TurnKind::Heartbeat && reply.trim() == HEARTBEAT_OK {
                    info!("heartbeat: nothing to do");
                    return Ok(None);
                }
                return Ok(Some(reply));
            }

            info!(
                "turn iteration {}: {} tool calls",
                iteration + 1,
                response.tool_calls.len()
            );
            thread.turns.push(ChatTurn::assistant_with_calls(
                &response.content,
                response.tool_calls.clone(),
            ));

            let results = self
                .execute_calls(&settings, &response.tool_calls, channel, user, &options)
                .await;
            for (call_id, result) in results {
                thread.turns.push(ChatTurn::tool_result(call_id, result.content));
            }
        }

        thread.turns.push(ChatTurn::assistant(MAX_ITERATIONS_NOTICE));
        self.ctx.memory.save_thread(&thread).await?;
        Ok(Some(MAX_ITERATIONS_NOTICE.to_string()))
    }

    /// Gate each call on the autonomy policy, then run the approved ones
    /// concurrently. Results come back in request order regardless of
    /// completion order.
    async fn execute_calls(
        &self,
        settings: &RuntimeSettings,
        calls: &[ToolCallRequest],
        channel: &str,
        user: &str,
        options: &TurnOptions,
    ) -> Vec<(String, ToolResult)> {
        // Approvals resolve one at a time: at most one pending approval
        // blocks a worker turn.
        let mut verdicts = Vec::with_capacity(calls.len());
        for call in calls {
            verdicts.push(self.approval_verdict(settings, call, channel, user, options).await);
        }

        let futures = calls.iter().zip(verdicts.iter()).map(|(call, approved)| {
            let approved = *approved;
            async move {
                if !approved {
                    let rejected = crate::core::errors::AgentError::ApprovalRejected(
                        "the human rejected this action or it expired. Do not retry it; \
                         find an alternative approach or report back to the user."
                            .to_string(),
                    );
                    return (call.id.clone(), ToolResult::error(rejected));
                }
                let result = self.registry.execute(&self.ctx, call, channel, user).await;
                (call.id.clone(), result)
            }
        });
        join_all(futures).await
    }

    /// True when the call may run. Asks a human when the autonomy level
    /// demands it.
    async fn approval_verdict(
        &self,
        settings: &RuntimeSettings,
        call: &ToolCallRequest,
        channel: &str,
        user: &str,
        options: &TurnOptions,
    ) -> bool {
        let needs_approval = match settings.autonomy_level {
            crate::core::settings::AutonomyLevel::Low => true,
            crate::core::settings::AutonomyLevel::Medium => is_dangerous(&call.name),
            crate::core::settings::AutonomyLevel::High => false,
        };
        if !needs_approval || !self.registry.contains(&call.name) {
            return true;
        }

        let task_id = options.task_ids.first().cloned();
        if let Some(id) = &task_id {
            let _ = self
                .ctx
                .tasks
                .update_status(id, TaskStatus::WaitingApproval, None, None, None);
        }

        let request = self.ctx.approvals.request(NewApproval {
            task_id: task_id.clone(),
            description: format!("{} wants to run {}", settings.agent_name, call.name),
            action: ProposedAction {
                tool: call.name.clone(),
                input: call.arguments.clone(),
                reasoning: String::new(),
            },
            risk: risk_of(&call.name),
            risk_reason: format!("'{}' is gated at {} autonomy", call.name, settings.autonomy_level.as_str()),
            channel: channel.to_string(),
            user: user.to_string(),
        });

        let approved = match request {
            Ok((req, rx)) => {
                info!(
                    "waiting for approval {} ({} / {})",
                    req.id,
                    call.name,
                    req.risk.as_str()
                );
                rx.await.unwrap_or(false)
            }
            Err(e) => {
                warn!("approval request failed: {}", e);
                false
            }
        };

        if let Some(id) = &task_id {
            let _ = self
                .ctx
                .tasks
                .update_status(id, TaskStatus::Running, None, None, None);
        }
        approved
    }

    fn handle_chat_command(&self, msg: &InboundMessage) -> Option<String> {
        let trimmed = msg.text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }
        let lower = trimmed.to_lowercase();
        let resolver = format!("{}:{}", msg.channel, msg.user);

        if let Some(prefix) = lower.strip_prefix("/approve ") {
            return Some(
                match self
                    .ctx
                    .approvals
                    .resolve_prefix(prefix.trim(), true, &resolver)
                {
                    Ok(req) => format!("Approved: {} ({})", req.description, &req.id[..8]),
                    Err(e) => format!("Could not approve: {}", e),
                },
            );
        }
        if let Some(prefix) = lower.strip_prefix("/reject ") {
            return Some(
                match self
                    .ctx
                    .approvals
                    .resolve_prefix(prefix.trim(), false, &resolver)
                {
                    Ok(req) => format!("Rejected: {} ({})", req.description, &req.id[..8]),
                    Err(e) => format!("Could not reject: {}", e),
                },
            );
        }

        match lower.as_str() {
            "/pending" => {
                let pending = self.ctx.approvals.pending_for(&msg.channel, &msg.user);
                if pending.is_empty() {
                    return Some("No approvals pending for you.".to_string());
                }
                let lines: Vec<String> = pending
                    .iter()
                    .map(|req| {
                        let left = (req.expires_at - Utc::now()).num_minutes().max(0);
                        format!(
                            "{} [{}] {} (expires in {} min)",
                            &req.id[..8],
                            req.risk.as_str(),
                            req.description,
                            left
                        )
                    })
                    .collect();
                Some(lines.join("\n"))
            }
            "/tasks" => {
                let tasks = self.ctx.tasks.all();
                if tasks.is_empty() {
                    return Some("No tasks yet.".to_string());
                }
                let lines: Vec<String> = tasks
                    .iter()
                    .take(15)
                    .map(|t| {
                        format!(
                            "{} [{}] {}% ${:.4} - {}",
                            &t.id[..8],
                            t.status.as_str(),
                            t.progress,
                            t.usage.cost,
                            t.title
                        )
                    })
                    .collect();
                Some(lines.join("\n"))
            }
            "/cost" | "/costs" => {
                let today = self.ctx.cost.today();
                let config = self.ctx.cost.config();
                Some(format!(
                    "Today: {} calls, {} tokens in / {} out, ${:.4} (budget ${:.2}/day, hard stop {})",
                    today.call_count,
                    today.input_tokens,
                    today.output_tokens,
                    today.cost,
                    config.daily_budget,
                    if config.hard_stop { "on" } else { "off" }
                ))
            }
            _ => None,
        }
    }

    async fn build_system_prompt(
        &self,
        settings: &RuntimeSettings,
        thread: &ConversationThread,
        extra: Option<&str>,
    ) -> String {
        let today = self.ctx.cost.today();
        let config = self.ctx.cost.config();
        let bullets = self.ctx.memory.bullets(10).await.unwrap_or_default();

        let mut prompt = format!(
            "You are {}, an autonomous agent running on the operator's machine.\n\
             Current time: {}\n\
             Workspace root: {} (all file operations are confined to it)\n\
             Autonomy level: {} - {}\n",
            settings.agent_name,
            Utc::now().to_rfc3339(),
            self.ctx.workspace.display(),
            settings.autonomy_level.as_str(),
            settings.autonomy_level.instruction(),
        );

        if !thread.summary.is_empty() {
            prompt.push_str(&format!(
                "\nEarlier conversation, condensed:\n{}\n",
                thread.summary
            ));
        }
        if !bullets.is_empty() {
            prompt.push_str("\nThings you remember:\n");
            for bullet in bullets {
                prompt.push_str(&format!("- {}\n", bullet));
            }
        }
        let skill_catalog = self.skills.catalog();
        if !skill_catalog.is_empty() {
            prompt.push_str("\nLoaded skill instructions:\n");
            prompt.push_str(&skill_catalog);
        }
        prompt.push_str(&format!(
            "\nToday's LLM usage: {} calls, ${:.4} of ${:.2} daily budget.\n",
            today.call_count, today.cost, config.daily_budget
        ));
        if let Some(extra) = extra {
            prompt.push('\n');
            prompt.push_str(extra);
            prompt.push('\n');
        }
        prompt
    }
}
