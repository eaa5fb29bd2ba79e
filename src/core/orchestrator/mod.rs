mod router;
pub mod types;

pub use router::ModelRouter;
pub use types::{
    AgentRegistry, AgentRole, Plan, PlannedSubtask, PlanStatus, SubAgent, SubAgentStatus,
    SubtaskStatus,
};

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::core::llm::{LlmManager, ModelTier};
use crate::core::session::{SessionLoop, TurnOptions};
use crate::core::tasks::{NewTask, TaskStatus};
use crate::tools::OrchestrationRequest;

const WORKER_RESULT_MAX: usize = 2000;
const SYNTHESIS_RESULT_MAX: usize = 5000;
/// Progress cap while subtasks run; the last 10 points belong to synthesis.
const PRE_SYNTHESIS_PROGRESS_CAP: u8 = 90;

/// Heuristic for automatic orchestration: long requests, or two or more
/// composite-work indicators.
pub fn should_orchestrate(description: &str) -> bool {
    if description.split_whitespace().count() > 100 {
        return true;
    }
    let lower = description.to_lowercase();
    let mut indicators = 0;
    if lower.matches(" and ").count() >= 2 {
        indicators += 1;
    }
    if lower.contains("steps") {
        indicators += 1;
    }
    if lower.contains("first") && lower.contains("then") {
        indicators += 1;
    }
    if lower.contains("compare") && lower.contains("with") {
        indicators += 1;
    }
    if lower.contains("research") && lower.contains("write") {
        indicators += 1;
    }
    if lower.contains("analyze") && lower.contains("report") {
        indicators += 1;
    }
    if ["plan", "comprehensive", "multiple"]
        .iter()
        .any(|w| lower.contains(w))
    {
        indicators += 1;
    }
    indicators >= 2
}

/// Shape the planner LLM is asked to produce.
#[derive(Debug, Deserialize)]
struct PlannerOutput {
    subtasks: Vec<PlannerSubtask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannerSubtask {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    model_tier: Option<String>,
    #[serde(default)]
    parallel_group: Option<String>,
    #[serde(default)]
    complexity: Option<u8>,
    #[serde(default)]
    requires_privacy: bool,
    #[serde(default)]
    depends_on: Vec<String>,
}

fn planner_prompt(objective: &str) -> String {
    format!(
        "Decompose the objective below into subtasks for specialist sub-agents.\n\
         Respond with JSON ONLY, no prose, matching:\n\
         {{\"subtasks\": [{{\"title\": str, \"description\": str, \
         \"role\": \"researcher|coder|writer|reviewer|executor\", \
         \"modelTier\": \"fast|balanced|reasoning|local\", \
         \"parallelGroup\": \"A\"|null, \"complexity\": 1-10, \
         \"requiresPrivacy\": bool, \"dependsOn\": [titles]}}]}}\n\
         Subtasks sharing a parallelGroup letter run concurrently; put \
         dependent work in a later group.\n\nObjective: {}",
        objective
    )
}

/// Parse the planner's JSON (tolerating markdown code fences) into a plan.
/// Returns `None` when the output is unusable; callers degrade gracefully.
fn parse_plan(parent_task_id: &str, objective: &str, raw: &str) -> Option<Plan> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed);

    let parsed: PlannerOutput = serde_json::from_str(body.trim()).ok()?;
    if parsed.subtasks.is_empty() {
        return None;
    }

    let mut plan = Plan::new(parent_task_id, objective);
    let mut ids_by_title: HashMap<String, String> = HashMap::new();

    for entry in &parsed.subtasks {
        let role = entry
            .role
            .as_deref()
            .and_then(AgentRole::from_str)
            .unwrap_or(AgentRole::Executor);
        let mut subtask = PlannedSubtask::new(&entry.title, &entry.description, role);
        subtask.tier = entry.model_tier.as_deref().and_then(ModelTier::from_str);
        subtask.parallel_group = entry.parallel_group.clone();
        subtask.complexity = entry.complexity.unwrap_or(5).clamp(1, 10);
        subtask.requires_privacy = entry.requires_privacy;
        ids_by_title.insert(entry.title.clone(), subtask.id.clone());
        plan.subtasks.push(subtask);
    }

    // Dependencies are recorded by id; unknown titles are dropped, which
    // keeps the graph acyclic (forward references cannot form cycles).
    for (entry, subtask) in parsed.subtasks.iter().zip(plan.subtasks.iter()) {
        let deps: Vec<String> = entry
            .depends_on
            .iter()
            .filter_map(|title| ids_by_title.get(title))
            .filter(|id| **id != subtask.id)
            .cloned()
            .collect();
        if !deps.is_empty() {
            plan.dependencies.insert(subtask.id.clone(), deps);
        }
    }

    Some(plan)
}

/// Decomposes complex requests into routed sub-agent turns, runs parallel
/// groups in label order, and synthesizes a final result onto the parent
/// task.
pub struct Orchestrator {
    session: Arc<SessionLoop>,
    llm: Arc<LlmManager>,
    router: ModelRouter,
    agents: Arc<AgentRegistry>,
}

impl Orchestrator {
    pub fn new(
        session: Arc<SessionLoop>,
        llm: Arc<LlmManager>,
        router: ModelRouter,
        agents: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            session,
            llm,
            router,
            agents,
        }
    }

    /// Consume orchestration requests for the life of the process.
    pub fn spawn_service(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<OrchestrationRequest>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let orchestrator = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.run(&request.task_id, &request.objective).await {
                        error!("orchestration for task {} failed: {}", request.task_id, e);
                        let _ = orchestrator.session.ctx.tasks.update_status(
                            &request.task_id,
                            TaskStatus::Failed,
                            None,
                            None,
                            Some(e.to_string()),
                        );
                    }
                });
            }
        })
    }

    pub async fn run(&self, parent_task_id: &str, objective: &str) -> Result<()> {
        info!("orchestrating task {}: planning", parent_task_id);
        let tasks = &self.session.ctx.tasks;
        tasks.update_status(parent_task_id, TaskStatus::Running, Some(5), None, None)?;

        let mut plan = self.plan(parent_task_id, objective).await;
        plan.status = PlanStatus::Executing;
        info!(
            "plan {} has {} subtasks across {} groups",
            plan.id,
            plan.subtasks.len(),
            plan.subtasks
                .iter()
                .filter_map(|s| s.parallel_group.as_ref())
                .collect::<std::collections::HashSet<_>>()
                .len()
        );

        self.execute(&mut plan).await;

        let failed = plan
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Failed)
            .count();
        let synthesis = self.synthesize(&plan).await;

        match synthesis {
            Ok(result) if failed == 0 => {
                plan.status = PlanStatus::Completed;
                tasks.update_status(
                    parent_task_id,
                    TaskStatus::Completed,
                    Some(100),
                    Some(result),
                    None,
                )?;
            }
            Ok(result) => {
                plan.status = PlanStatus::Failed;
                tasks.update_status(
                    parent_task_id,
                    TaskStatus::Failed,
                    None,
                    Some(result),
                    Some(format!("{} subtasks failed", failed)),
                )?;
            }
            Err(e) => {
                plan.status = PlanStatus::Failed;
                tasks.update_status(
                    parent_task_id,
                    TaskStatus::Failed,
                    None,
                    None,
                    Some(format!("synthesis failed: {}", e)),
                )?;
            }
        }
        Ok(())
    }

    /// One JSON-only planning call; unusable output degrades to a single
    /// balanced subtask.
    async fn plan(&self, parent_task_id: &str, objective: &str) -> Plan {
        let route = self
            .llm
            .route_for(ModelTier::Balanced)
            .or_else(|| self.llm.default_route());
        let Some(route) = route else {
            return Plan::degraded(parent_task_id, objective);
        };

        let prompt = planner_prompt(objective);
        let turns = vec![crate::core::llm::ChatTurn::user(prompt)];
        match self.llm.complete(&route, "", &turns, &[]).await {
            Ok(response) => {
                self.session.ctx.cost.track_usage(
                    &route.model,
                    response.usage.input_tokens,
                    response.usage.output_tokens,
                    route.estimate_cost(response.usage),
                );
                match parse_plan(parent_task_id, objective, &response.content) {
                    Some(plan) => plan,
                    None => {
                        warn!("planner output unparseable; degrading to a single subtask");
                        Plan::degraded(parent_task_id, objective)
                    }
                }
            }
            Err(e) => {
                warn!("planning call failed ({}); degrading to a single subtask", e);
                Plan::degraded(parent_task_id, objective)
            }
        }
    }

    /// Parallel groups in lexicographic label order, then ungrouped
    /// subtasks sequentially. Dependencies across groups are honored by the
    /// ordering; in-group violations are logged, not enforced.
    async fn execute(&self, plan: &mut Plan) {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut sequential: Vec<usize> = Vec::new();
        for (i, subtask) in plan.subtasks.iter().enumerate() {
            match &subtask.parallel_group {
                Some(label) => groups.entry(label.clone()).or_default().push(i),
                None => sequential.push(i),
            }
        }

        let parent_task_id = plan.parent_task_id.clone();
        let objective = plan.objective.clone();

        for (label, indices) in &groups {
            self.warn_in_group_dependencies(plan, label, indices);
            info!("executing parallel group '{}' ({} subtasks)", label, indices.len());
            let prior = self.completed_results(plan);
            let futures: Vec<_> = indices
                .iter()
                .map(|&i| {
                    let subtask = plan.subtasks[i].clone();
                    let prior = prior.clone();
                    let parent_task_id = parent_task_id.clone();
                    let objective = objective.clone();
                    async move {
                        (
                            i,
                            self.run_subtask(&parent_task_id, &objective, subtask, prior)
                                .await,
                        )
                    }
                })
                .collect();
            let outcomes = join_all(futures).await;
            for (i, outcome) in outcomes {
                apply_outcome(&mut plan.subtasks[i], outcome);
            }
            self.advance_parent_progress(plan);
        }

        for i in sequential {
            let prior = self.completed_results(plan);
            let subtask = plan.subtasks[i].clone();
            let outcome = self
                .run_subtask(&parent_task_id, &objective, subtask, prior)
                .await;
            apply_outcome(&mut plan.subtasks[i], outcome);
            self.advance_parent_progress(plan);
        }
    }

    fn warn_in_group_dependencies(&self, plan: &Plan, label: &str, indices: &[usize]) {
        let group_ids: Vec<&String> = indices.iter().map(|&i| &plan.subtasks[i].id).collect();
        for &i in indices {
            let subtask = &plan.subtasks[i];
            if let Some(deps) = plan.dependencies.get(&subtask.id) {
                for dep in deps {
                    if group_ids.contains(&dep) {
                        warn!(
                            "subtask '{}' depends on a sibling in parallel group '{}'; \
                             executing anyway",
                            subtask.title, label
                        );
                    }
                }
            }
        }
    }

    fn completed_results(&self, plan: &Plan) -> Vec<(String, String)> {
        plan.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .filter_map(|s| {
                s.result
                    .as_ref()
                    .map(|r| (s.title.clone(), truncate(r, WORKER_RESULT_MAX)))
            })
            .collect()
    }

    fn advance_parent_progress(&self, plan: &Plan) {
        let total = plan.subtasks.len().max(1);
        let done = plan
            .subtasks
            .iter()
            .filter(|s| {
                matches!(s.status, SubtaskStatus::Completed | SubtaskStatus::Failed)
            })
            .count();
        let progress = ((done * 100 / total) as u8).min(PRE_SYNTHESIS_PROGRESS_CAP);
        let current = self
            .session
            .ctx
            .tasks
            .get(&plan.parent_task_id)
            .map(|t| t.progress)
            .unwrap_or(0);
        // Monotonic: never step progress backwards.
        if progress > current {
            let _ = self.session.ctx.tasks.update_status(
                &plan.parent_task_id,
                TaskStatus::Running,
                Some(progress),
                None,
                None,
            );
        }
    }

    /// One worker turn: child task, routed model, session loop, results
    /// charged to child and parent.
    async fn run_subtask(
        &self,
        parent_task_id: &str,
        objective: &str,
        subtask: PlannedSubtask,
        prior: Vec<(String, String)>,
    ) -> (SubtaskStatus, Option<String>, Option<String>) {
        let tasks = &self.session.ctx.tasks;
        let child = match tasks.create(NewTask {
            parent_id: Some(parent_task_id.to_string()),
            title: subtask.title.clone(),
            description: subtask.description.clone(),
            source_channel: "orchestrator".to_string(),
            source_user: "system".to_string(),
            ..Default::default()
        }) {
            Ok(child) => child,
            Err(e) => return (SubtaskStatus::Failed, None, Some(e.to_string())),
        };

        let (route, rationale) = self.router.route(&subtask);
        let agent_id = self.agents.spawn(
            &format!("{}-{}", subtask.role.as_str(), &child.id[..8]),
            subtask.role,
            &route.provider,
            &route.model,
            &child.id,
            &rationale,
        );
        let _ = tasks.update_status(&child.id, TaskStatus::Running, None, None, None);

        let mut prompt_extra = format!(
            "You are a {} sub-agent handling one part of a larger objective.\n\
             Overall objective: {}\n\
             Your subtask: {} - {}\n\
             Complete ONLY your subtask and reply with your result.",
            subtask.role.as_str(),
            objective,
            subtask.title,
            subtask.description
        );
        if !prior.is_empty() {
            prompt_extra.push_str("\nResults from earlier subtasks:\n");
            for (title, result) in &prior {
                prompt_extra.push_str(&format!("## {}\n{}\n", title, result));
            }
        }

        let outcome = self
            .session
            .run_turn(
                "orchestrator",
                &child.id,
                &subtask.description,
                crate::core::session::TurnKind::Chat,
                TurnOptions {
                    route: Some(route),
                    system_extra: Some(prompt_extra),
                    task_ids: vec![child.id.clone(), parent_task_id.to_string()],
                },
            )
            .await;

        let usage = tasks
            .get(&child.id)
            .map(|t| crate::core::llm::TokenUsage {
                input_tokens: t.usage.input_tokens,
                output_tokens: t.usage.output_tokens,
            })
            .unwrap_or_default();

        match outcome {
            Ok(result) => {
                let result = result.unwrap_or_default();
                let _ = tasks.update_status(
                    &child.id,
                    TaskStatus::Completed,
                    Some(100),
                    Some(result.clone()),
                    None,
                );
                self.agents.finish(&agent_id, SubAgentStatus::Idle, usage);
                (SubtaskStatus::Completed, Some(result), Some(agent_id))
            }
            Err(e) => {
                warn!("subtask '{}' failed: {}", subtask.title, e);
                let _ = tasks.update_status(
                    &child.id,
                    TaskStatus::Failed,
                    None,
                    None,
                    Some(e.to_string()),
                );
                self.agents.finish(&agent_id, SubAgentStatus::Error, usage);
                (SubtaskStatus::Failed, None, Some(agent_id))
            }
        }
    }

    /// Final LLM pass over every subtask result, single-subtask plans
    /// included; the output becomes the parent task's result.
    async fn synthesize(&self, plan: &Plan) -> Result<String> {
        let route = self
            .llm
            .route_for(ModelTier::Balanced)
            .or_else(|| self.llm.default_route())
            .ok_or_else(|| anyhow::anyhow!("no LLM route configured"))?;

        let mut prompt = format!(
            "Combine these subtask results into one coherent answer to the objective.\n\
             Objective: {}\n\n",
            plan.objective
        );
        for subtask in &plan.subtasks {
            let body = match (&subtask.status, &subtask.result) {
                (SubtaskStatus::Completed, Some(r)) => truncate(r, SYNTHESIS_RESULT_MAX),
                (SubtaskStatus::Failed, _) => "(failed)".to_string(),
                _ => "(no result)".to_string(),
            };
            prompt.push_str(&format!("## {}\n{}\n\n", subtask.title, body));
        }

        let turns = vec![crate::core::llm::ChatTurn::user(prompt)];
        let response = self.llm.complete(&route, "", &turns, &[]).await?;
        self.session.ctx.cost.track_usage(
            &route.model,
            response.usage.input_tokens,
            response.usage.output_tokens,
            route.estimate_cost(response.usage),
        );
        Ok(response.content)
    }
}

fn apply_outcome(
    subtask: &mut PlannedSubtask,
    outcome: (SubtaskStatus, Option<String>, Option<String>),
) {
    subtask.status = outcome.0;
    subtask.result = outcome.1;
    subtask.assigned_agent = outcome.2;
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_fires_on_composite_requests() {
        assert!(should_orchestrate(
            "Research three renewable energy sources and write a comparison report with pros and cons"
        ));
        assert!(should_orchestrate(
            "First gather the logs, then analyze them and produce a report with multiple sections"
        ));
        // Word-count trigger.
        let long = "word ".repeat(101);
        assert!(should_orchestrate(&long));
    }

    #[test]
    fn heuristic_ignores_simple_requests() {
        assert!(!should_orchestrate("what's the weather like"));
        assert!(!should_orchestrate("rename the file to notes.md"));
        assert!(!should_orchestrate("remind me to stretch at 3pm"));
    }

    #[test]
    fn parse_plan_accepts_fenced_json() {
        let raw = r#"```json
{"subtasks": [
  {"title": "Solar", "description": "research solar", "role": "researcher",
   "modelTier": "fast", "parallelGroup": "A", "complexity": 3,
   "requiresPrivacy": false, "dependsOn": []},
  {"title": "Report", "description": "write it", "role": "writer",
   "parallelGroup": null, "complexity": 6, "dependsOn": ["Solar"]}
]}
```"#;
        let plan = parse_plan("parent", "objective", raw).unwrap();
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.subtasks[0].role, AgentRole::Researcher);
        assert_eq!(plan.subtasks[0].tier, Some(ModelTier::Fast));
        assert_eq!(plan.subtasks[0].parallel_group.as_deref(), Some("A"));
        assert_eq!(plan.subtasks[1].parallel_group, None);

        let deps = plan.dependencies.get(&plan.subtasks[1].id).unwrap();
        assert_eq!(deps, &vec![plan.subtasks[0].id.clone()]);
    }

    #[test]
    fn parse_plan_rejects_garbage() {
        assert!(parse_plan("p", "o", "I think we should split this up").is_none());
        assert!(parse_plan("p", "o", "{\"subtasks\": []}").is_none());
    }

    #[test]
    fn parse_plan_drops_unknown_dependency_titles() {
        let raw = r#"{"subtasks": [
            {"title": "A", "description": "", "dependsOn": ["Nonexistent", "A"]}
        ]}"#;
        let plan = parse_plan("p", "o", raw).unwrap();
        assert!(plan.dependencies.is_empty());
    }

    #[test]
    fn planner_prompt_pins_json_contract() {
        let prompt = planner_prompt("build a report");
        assert!(prompt.contains("JSON ONLY"));
        assert!(prompt.contains("parallelGroup"));
        assert!(prompt.contains("build a report"));
    }

    mod synthesis {
        use super::super::*;
        use crate::core::llm::{
            ChatTurn, LlmClient, LlmResponse, ModelRoute, TokenUsage, ToolSpec,
        };
        use crate::skills::SkillSet;
        use crate::tools::testutil::context;
        use crate::tools::ToolRegistry;
        use anyhow::Result;
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Mutex};
        use tempfile::tempdir;

        struct RecordingClient {
            calls: Arc<AtomicUsize>,
            last_prompt: Arc<Mutex<String>>,
        }

        #[async_trait]
        impl LlmClient for RecordingClient {
            fn provider_id(&self) -> &str {
                "mock"
            }

            async fn complete(
                &self,
                _model: &str,
                _system_prompt: &str,
                turns: &[ChatTurn],
                _tools: &[ToolSpec],
            ) -> Result<LlmResponse> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(turn) = turns.last() {
                    *self.last_prompt.lock().unwrap() = turn.content.clone();
                }
                Ok(LlmResponse {
                    content: "synthesized answer".to_string(),
                    tool_calls: Vec::new(),
                    usage: TokenUsage {
                        input_tokens: 50,
                        output_tokens: 10,
                    },
                })
            }
        }

        async fn orchestrator_with_mock(
            workspace: &std::path::Path,
            calls: Arc<AtomicUsize>,
            last_prompt: Arc<Mutex<String>>,
        ) -> Orchestrator {
            let ctx = Arc::new(context(workspace).await);
            let mut manager = LlmManager::new(ModelTier::Balanced);
            manager.register_client(Box::new(RecordingClient { calls, last_prompt }));
            manager.add_route(ModelRoute {
                tier: ModelTier::Balanced,
                provider: "mock".to_string(),
                model: "mock-mid".to_string(),
                input_cost_per_mtok: 1.0,
                output_cost_per_mtok: 2.0,
            });
            let llm = Arc::new(manager);
            let session = Arc::new(crate::core::session::SessionLoop::new(
                Arc::clone(&ctx),
                Arc::new(ToolRegistry::with_builtins()),
                Arc::clone(&llm),
                Arc::new(SkillSet::load(&workspace.join("skills")).unwrap()),
            ));
            let router = ModelRouter::new(Arc::clone(&llm), Arc::clone(&ctx.cost));
            Orchestrator::new(session, llm, router, Arc::new(AgentRegistry::new()))
        }

        #[tokio::test]
        async fn single_subtask_plan_still_gets_the_final_llm_call() {
            let tmp = tempdir().unwrap();
            let calls = Arc::new(AtomicUsize::new(0));
            let last_prompt = Arc::new(Mutex::new(String::new()));
            let orchestrator =
                orchestrator_with_mock(tmp.path(), Arc::clone(&calls), Arc::clone(&last_prompt))
                    .await;

            let mut plan = Plan::degraded("parent-task", "summarize the incident");
            plan.subtasks[0].status = SubtaskStatus::Completed;
            plan.subtasks[0].result = Some("raw subtask output".to_string());

            let result = orchestrator.synthesize(&plan).await.unwrap();
            assert_eq!(result, "synthesized answer");
            assert_eq!(calls.load(Ordering::SeqCst), 1);

            let prompt = last_prompt.lock().unwrap();
            assert!(prompt.contains("summarize the incident"));
            assert!(prompt.contains("raw subtask output"));

            // Synthesis usage is accounted like any other call.
            let today = orchestrator.session.ctx.cost.today();
            assert_eq!(today.call_count, 1);
            assert_eq!(today.input_tokens, 50);
        }

        #[tokio::test]
        async fn multi_subtask_plan_folds_every_result_into_one_call() {
            let tmp = tempdir().unwrap();
            let calls = Arc::new(AtomicUsize::new(0));
            let last_prompt = Arc::new(Mutex::new(String::new()));
            let orchestrator =
                orchestrator_with_mock(tmp.path(), Arc::clone(&calls), Arc::clone(&last_prompt))
                    .await;

            let mut plan = Plan::new("parent-task", "compare the options");
            for (title, result) in [("Option A", Some("A looks cheap")), ("Option B", None)] {
                let mut subtask = PlannedSubtask::new(title, "", AgentRole::Researcher);
                subtask.status = if result.is_some() {
                    SubtaskStatus::Completed
                } else {
                    SubtaskStatus::Failed
                };
                subtask.result = result.map(|r| r.to_string());
                plan.subtasks.push(subtask);
            }

            let result = orchestrator.synthesize(&plan).await.unwrap();
            assert_eq!(result, "synthesized answer");
            assert_eq!(calls.load(Ordering::SeqCst), 1);

            let prompt = last_prompt.lock().unwrap();
            assert!(prompt.contains("Option A"));
            assert!(prompt.contains("A looks cheap"));
            assert!(prompt.contains("Option B"));
            assert!(prompt.contains("(failed)"));
        }
    }
}
