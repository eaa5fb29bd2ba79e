pub mod providers;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// One turn of a conversation thread. `tool_calls` is populated on assistant
/// turns that requested tools; `tool_call_id` on tool-result turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A tool surface advertised to the model. `parameters` is JSON-Schema
/// carried as opaque data; handlers validate their own arguments.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Unified response shape. Provider-specific encodings (tool-use blocks vs.
/// function calls) are flattened into this by the adapters in `providers`.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Balanced,
    Reasoning,
    Local,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Balanced => "balanced",
            ModelTier::Reasoning => "reasoning",
            ModelTier::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "fast" => Some(ModelTier::Fast),
            "balanced" => Some(ModelTier::Balanced),
            "reasoning" => Some(ModelTier::Reasoning),
            "local" => Some(ModelTier::Local),
            _ => None,
        }
    }
}

/// Concrete provider+model binding for a tier, with price coefficients in
/// dollars per million tokens. Local routes carry zero coefficients.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRoute {
    pub tier: ModelTier,
    pub provider: String,
    pub model: String,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl ModelRoute {
    pub fn estimate_cost(&self, usage: TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1_000_000.0) * self.input_cost_per_mtok
            + (usage.output_tokens as f64 / 1_000_000.0) * self.output_cost_per_mtok
    }
}

/// Registry of provider clients plus the tier → route table built at init.
pub struct LlmManager {
    clients: HashMap<String, Box<dyn LlmClient>>,
    routes: Vec<ModelRoute>,
    default_tier: ModelTier,
}

impl LlmManager {
    pub fn new(default_tier: ModelTier) -> Self {
        Self {
            clients: HashMap::new(),
            routes: Vec::new(),
            default_tier,
        }
    }

    pub fn register_client(&mut self, client: Box<dyn LlmClient>) {
        info!("registered LLM provider: {}", client.provider_id());
        self.clients.insert(client.provider_id().to_string(), client);
    }

    pub fn add_route(&mut self, route: ModelRoute) {
        info!(
            "model route: {} -> {}/{}",
            route.tier.as_str(),
            route.provider,
            route.model
        );
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[ModelRoute] {
        &self.routes
    }

    pub fn route_for(&self, tier: ModelTier) -> Option<ModelRoute> {
        self.routes.iter().find(|r| r.tier == tier).cloned()
    }

    pub fn has_local_route(&self) -> bool {
        self.routes.iter().any(|r| r.tier == ModelTier::Local)
    }

    /// Cheapest non-local route by combined price coefficients.
    pub fn cheapest_route(&self) -> Option<ModelRoute> {
        self.routes
            .iter()
            .filter(|r| r.tier != ModelTier::Local)
            .min_by(|a, b| {
                (a.input_cost_per_mtok + a.output_cost_per_mtok)
                    .total_cmp(&(b.input_cost_per_mtok + b.output_cost_per_mtok))
            })
            .cloned()
    }

    pub fn default_route(&self) -> Option<ModelRoute> {
        self.route_for(self.default_tier)
            .or_else(|| self.routes.first().cloned())
    }

    /// Route for an explicit provider/model override (task-level overrides).
    /// Prices fall back to the provider's configured route for that model,
    /// or zero when unknown.
    pub fn route_for_override(&self, provider: &str, model: &str) -> ModelRoute {
        self.routes
            .iter()
            .find(|r| r.provider == provider && r.model == model)
            .cloned()
            .unwrap_or(ModelRoute {
                tier: self.default_tier,
                provider: provider.to_string(),
                model: model.to_string(),
                input_cost_per_mtok: 0.0,
                output_cost_per_mtok: 0.0,
            })
    }

    pub async fn complete(
        &self,
        route: &ModelRoute,
        system_prompt: &str,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse> {
        let client = self.clients.get(&route.provider).ok_or_else(|| {
            anyhow::anyhow!("no client registered for provider '{}'", route.provider)
        })?;
        client
            .complete(&route.model, system_prompt, turns, tools)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(tier: ModelTier, provider: &str, model: &str, inp: f64, out: f64) -> ModelRoute {
        ModelRoute {
            tier,
            provider: provider.to_string(),
            model: model.to_string(),
            input_cost_per_mtok: inp,
            output_cost_per_mtok: out,
        }
    }

    #[test]
    fn cost_estimate_uses_both_coefficients() {
        let r = route(ModelTier::Balanced, "anthropic", "mid", 3.0, 15.0);
        let cost = r.estimate_cost(TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
        });
        assert!((cost - 18.0).abs() < 1e-9);

        let zero = route(ModelTier::Local, "local", "llama", 0.0, 0.0);
        assert_eq!(
            zero.estimate_cost(TokenUsage {
                input_tokens: 50_000,
                output_tokens: 50_000
            }),
            0.0
        );
    }

    #[test]
    fn cheapest_route_skips_local() {
        let mut mgr = LlmManager::new(ModelTier::Balanced);
        mgr.add_route(route(ModelTier::Local, "local", "llama", 0.0, 0.0));
        mgr.add_route(route(ModelTier::Fast, "openai", "mini", 0.15, 0.6));
        mgr.add_route(route(ModelTier::Balanced, "anthropic", "mid", 3.0, 15.0));
        assert_eq!(mgr.cheapest_route().unwrap().model, "mini");
    }

    #[test]
    fn default_route_falls_back_to_first() {
        let mut mgr = LlmManager::new(ModelTier::Reasoning);
        mgr.add_route(route(ModelTier::Fast, "openai", "mini", 0.15, 0.6));
        assert_eq!(mgr.default_route().unwrap().model, "mini");
    }

    #[test]
    fn override_route_prefers_known_pricing() {
        let mut mgr = LlmManager::new(ModelTier::Balanced);
        mgr.add_route(route(ModelTier::Balanced, "anthropic", "mid", 3.0, 15.0));
        let known = mgr.route_for_override("anthropic", "mid");
        assert_eq!(known.input_cost_per_mtok, 3.0);
        let unknown = mgr.route_for_override("anthropic", "experimental");
        assert_eq!(unknown.input_cost_per_mtok, 0.0);
    }

    #[test]
    fn tier_string_roundtrip() {
        for tier in [
            ModelTier::Fast,
            ModelTier::Balanced,
            ModelTier::Reasoning,
            ModelTier::Local,
        ] {
            assert_eq!(ModelTier::from_str(tier.as_str()), Some(tier));
        }
        assert_eq!(ModelTier::from_str("huge"), None);
    }

    #[test]
    fn chat_turn_constructors_shape_roles() {
        let t = ChatTurn::tool_result("call_1", "ok");
        assert_eq!(t.role, "tool");
        assert_eq!(t.tool_call_id.as_deref(), Some("call_1"));
        let a = ChatTurn::assistant_with_calls(
            "thinking",
            vec![ToolCallRequest {
                id: "call_2".into(),
                name: "read_file".into(),
                arguments: serde_json::json!({"path": "a.txt"}),
            }],
        );
        assert_eq!(a.tool_calls.len(), 1);
    }
}
