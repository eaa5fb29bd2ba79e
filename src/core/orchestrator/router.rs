use std::sync::Arc;

use tracing::warn;

use super::types::PlannedSubtask;
use crate::core::cost::CostTracker;
use crate::core::llm::{LlmManager, ModelRoute, ModelTier};

/// Budget floor below which every subtask drops to the cheapest route.
const LOW_BUDGET_FLOOR: f64 = 0.10;

/// Picks a concrete model route per subtask: privacy first, then remaining
/// budget, then explicit tier, then complexity.
pub struct ModelRouter {
    llm: Arc<LlmManager>,
    cost: Arc<CostTracker>,
}

impl ModelRouter {
    pub fn new(llm: Arc<LlmManager>, cost: Arc<CostTracker>) -> Self {
        Self { llm, cost }
    }

    pub fn route(&self, subtask: &PlannedSubtask) -> (ModelRoute, String) {
        if subtask.requires_privacy {
            if let Some(route) = self.llm.route_for(ModelTier::Local) {
                return (route, "privacy-sensitive: routed to the local model".to_string());
            }
            warn!(
                "subtask '{}' requires privacy but no local route exists; using balanced",
                subtask.title
            );
            if let Some(route) = self.llm.route_for(ModelTier::Balanced) {
                return (
                    route,
                    "privacy requested but no local model is configured; balanced with warning"
                        .to_string(),
                );
            }
        }

        let config = self.cost.config();
        if config.daily_budget > 0.0 {
            let remaining = config.daily_budget - self.cost.today().cost;
            if remaining < LOW_BUDGET_FLOOR {
                if let Some(route) = self.llm.cheapest_route() {
                    return (
                        route,
                        format!("remaining budget ${:.2} below floor: cheapest route", remaining),
                    );
                }
            }
        }

        if let Some(tier) = subtask.tier {
            if let Some(route) = self.llm.route_for(tier) {
                return (route, format!("planner requested the {} tier", tier.as_str()));
            }
        }

        let tier = match subtask.complexity {
            0..=3 => ModelTier::Fast,
            4..=7 => ModelTier::Balanced,
            _ => ModelTier::Reasoning,
        };
        if let Some(route) = self.llm.route_for(tier) {
            return (
                route,
                format!("complexity {} maps to the {} tier", subtask.complexity, tier.as_str()),
            );
        }

        // Last resort: whatever the manager would use by default.
        let route = self
            .llm
            .default_route()
            .unwrap_or(ModelRoute {
                tier: ModelTier::Balanced,
                provider: "unconfigured".to_string(),
                model: "unconfigured".to_string(),
                input_cost_per_mtok: 0.0,
                output_cost_per_mtok: 0.0,
            });
        (route, "no tier route configured; using the default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::CostConfig;
    use crate::core::orchestrator::types::AgentRole;
    use tempfile::tempdir;

    fn manager(with_local: bool) -> Arc<LlmManager> {
        let mut mgr = LlmManager::new(ModelTier::Balanced);
        mgr.add_route(ModelRoute {
            tier: ModelTier::Fast,
            provider: "openai".into(),
            model: "mini".into(),
            input_cost_per_mtok: 0.15,
            output_cost_per_mtok: 0.6,
        });
        mgr.add_route(ModelRoute {
            tier: ModelTier::Balanced,
            provider: "anthropic".into(),
            model: "mid".into(),
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
        });
        mgr.add_route(ModelRoute {
            tier: ModelTier::Reasoning,
            provider: "anthropic".into(),
            model: "large".into(),
            input_cost_per_mtok: 15.0,
            output_cost_per_mtok: 75.0,
        });
        if with_local {
            mgr.add_route(ModelRoute {
                tier: ModelTier::Local,
                provider: "local".into(),
                model: "llama".into(),
                input_cost_per_mtok: 0.0,
                output_cost_per_mtok: 0.0,
            });
        }
        Arc::new(mgr)
    }

    fn subtask(complexity: u8) -> PlannedSubtask {
        let mut s = PlannedSubtask::new("t", "d", AgentRole::Researcher);
        s.complexity = complexity;
        s
    }

    fn router(with_local: bool, tmp: &tempfile::TempDir) -> ModelRouter {
        let cost = Arc::new(CostTracker::open(tmp.path()).unwrap());
        // A generous budget keeps the low-budget rule out of the way.
        cost.set_config(CostConfig {
            daily_budget: 100.0,
            weekly_budget: 0.0,
            hard_stop: true,
        })
        .unwrap();
        ModelRouter::new(manager(with_local), cost)
    }

    #[test]
    fn privacy_routes_local_when_available() {
        let tmp = tempdir().unwrap();
        let r = router(true, &tmp);
        let mut s = subtask(9);
        s.requires_privacy = true;
        let (route, rationale) = r.route(&s);
        assert_eq!(route.tier, ModelTier::Local);
        assert!(rationale.contains("local"));
    }

    #[test]
    fn privacy_without_local_falls_back_to_balanced() {
        let tmp = tempdir().unwrap();
        let r = router(false, &tmp);
        let mut s = subtask(9);
        s.requires_privacy = true;
        let (route, rationale) = r.route(&s);
        assert_eq!(route.tier, ModelTier::Balanced);
        assert!(rationale.contains("no local model"));
    }

    #[test]
    fn low_remaining_budget_picks_cheapest() {
        let tmp = tempdir().unwrap();
        let cost = Arc::new(CostTracker::open(tmp.path()).unwrap());
        cost.set_config(CostConfig {
            daily_budget: 1.0,
            weekly_budget: 0.0,
            hard_stop: true,
        })
        .unwrap();
        cost.track_usage("m", 0, 0, 0.95);
        let r = ModelRouter::new(manager(true), cost);
        let (route, rationale) = r.route(&subtask(9));
        assert_eq!(route.model, "mini");
        assert!(rationale.contains("cheapest"));
    }

    #[test]
    fn explicit_tier_wins_over_complexity() {
        let tmp = tempdir().unwrap();
        let r = router(false, &tmp);
        let mut s = subtask(1);
        s.tier = Some(ModelTier::Reasoning);
        let (route, _) = r.route(&s);
        assert_eq!(route.tier, ModelTier::Reasoning);
    }

    #[test]
    fn complexity_bands_map_to_tiers() {
        let tmp = tempdir().unwrap();
        let r = router(false, &tmp);
        assert_eq!(r.route(&subtask(2)).0.tier, ModelTier::Fast);
        assert_eq!(r.route(&subtask(5)).0.tier, ModelTier::Balanced);
        assert_eq!(r.route(&subtask(9)).0.tier, ModelTier::Reasoning);
    }
}
