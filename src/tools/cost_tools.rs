use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_bool, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::cost::CostConfig;
use crate::core::errors::AgentError;

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Cost,
        "get_costs",
        "Today's LLM usage: calls, tokens, estimated cost, and the configured budget.",
        json!({"type": "object", "properties": {}}),
        Arc::new(GetCosts),
    );
    reg.register(
        ToolCategory::Cost,
        "set_budget",
        "Configure the daily/weekly budget and the hard-stop flag.",
        json!({
            "type": "object",
            "properties": {
                "daily_budget": {"type": "number"},
                "weekly_budget": {"type": "number"},
                "hard_stop": {"type": "boolean"}
            }
        }),
        Arc::new(SetBudget),
    );
}

struct GetCosts;

#[async_trait]
impl ToolHandler for GetCosts {
    async fn run(&self, ctx: &ToolContext, _args: Value) -> Result<String, AgentError> {
        let today = ctx.cost.today();
        let config = ctx.cost.config();
        let mut out = format!(
            "today ({}): {} calls, {} in / {} out tokens, ${:.4} of ${:.2} daily budget (hard stop: {})\n",
            today.date,
            today.call_count,
            today.input_tokens,
            today.output_tokens,
            today.cost,
            config.daily_budget,
            if config.hard_stop { "on" } else { "off" },
        );
        for (model, usage) in &today.by_model {
            out.push_str(&format!(
                "  {}: {} calls, ${:.4}\n",
                model, usage.calls, usage.cost
            ));
        }
        Ok(out)
    }
}

struct SetBudget;

#[async_trait]
impl ToolHandler for SetBudget {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let current = ctx.cost.config();
        let next = CostConfig {
            daily_budget: args
                .get("daily_budget")
                .and_then(|v| v.as_f64())
                .unwrap_or(current.daily_budget),
            weekly_budget: args
                .get("weekly_budget")
                .and_then(|v| v.as_f64())
                .unwrap_or(current.weekly_budget),
            hard_stop: opt_bool(&args, "hard_stop").unwrap_or(current.hard_stop),
        };
        if next.daily_budget < 0.0 || next.weekly_budget < 0.0 {
            return Err(AgentError::validation("budgets must be non-negative"));
        }
        ctx.cost
            .set_config(next.clone())
            .map_err(|e| AgentError::transport(e.to_string()))?;
        Ok(format!(
            "budget set: ${:.2}/day, ${:.2}/week, hard stop {}",
            next.daily_budget,
            next.weekly_budget,
            if next.hard_stop { "on" } else { "off" }
        ))
    }
}
