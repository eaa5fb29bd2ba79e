use std::path::PathBuf;

use crate::core::llm::providers::{AnthropicClient, OpenAiClient};
use crate::core::llm::{LlmManager, ModelRoute, ModelTier};
use crate::core::settings::AutonomyLevel;

/// Process configuration read from the environment at boot. Everything has
/// a workable default so a bare `famulus` starts on loopback.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub workspace: PathBuf,
    pub agent_name: Option<String>,
    pub gateway_host: String,
    pub gateway_port: u16,
    pub webhook_port: u16,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_minutes: Option<u64>,
    pub heartbeat_channel: Option<String>,
    pub max_tool_calls: Option<usize>,
    pub autonomy: Option<AutonomyLevel>,
    pub allowed_user_ids: Vec<String>,

    pub llm_provider: String,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub local_base_url: Option<String>,
    pub model_fast: Option<String>,
    pub model_balanced: Option<String>,
    pub model_reasoning: Option<String>,
    pub model_local: Option<String>,

    /// Consumed by the external channel clients, not by the kernel itself.
    pub telegram_bot_token: Option<String>,
    pub discord_bot_token: Option<String>,
    pub discord_allowed_channel_ids: Vec<String>,

    // Security switch / limit overrides; `None` keeps the persisted value.
    pub sandbox_enabled: Option<bool>,
    pub ssrf_protection: Option<bool>,
    pub injection_guard: Option<bool>,
    pub gateway_auth: Option<bool>,
    pub audit_enabled: Option<bool>,
    pub allow_localhost_urls: Option<bool>,
    pub shell_timeout_secs: Option<u64>,
    pub max_tool_output_chars: Option<usize>,
    pub rate_limit_per_minute: Option<u32>,
    pub max_request_body_bytes: Option<usize>,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn var_bool(name: &str) -> Option<bool> {
    var(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn var_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    var(name).and_then(|v| v.parse().ok())
}

fn var_list(name: &str) -> Vec<String> {
    var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl EnvConfig {
    pub fn load() -> Self {
        Self {
            workspace: var("AGENT_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("agent-workspace")),
            agent_name: var("AGENT_NAME"),
            gateway_host: var("GATEWAY_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            gateway_port: var_parse("GATEWAY_PORT").unwrap_or(18789),
            webhook_port: var_parse("WEBHOOK_PORT").unwrap_or(18790),
            heartbeat_enabled: var_bool("HEARTBEAT_ENABLED").unwrap_or(true),
            heartbeat_interval_minutes: var_parse("HEARTBEAT_INTERVAL"),
            heartbeat_channel: var("HEARTBEAT_CHANNEL"),
            max_tool_calls: var_parse("AGENT_MAX_TOOL_CALLS"),
            autonomy: var("AGENT_AUTONOMY_LEVEL")
                .as_deref()
                .and_then(AutonomyLevel::from_str),
            allowed_user_ids: var_list("ALLOWED_USER_IDS"),
            llm_provider: var("LLM_PROVIDER").unwrap_or_else(|| "anthropic".to_string()),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            local_base_url: var("LOCAL_LLM_BASE_URL"),
            model_fast: var("MODEL_FAST"),
            model_balanced: var("MODEL_BALANCED"),
            model_reasoning: var("MODEL_REASONING"),
            model_local: var("MODEL_LOCAL"),
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN"),
            discord_bot_token: var("DISCORD_BOT_TOKEN"),
            discord_allowed_channel_ids: var_list("DISCORD_ALLOWED_CHANNEL_IDS"),
            sandbox_enabled: var_bool("SANDBOX_ENABLED"),
            ssrf_protection: var_bool("SSRF_PROTECTION"),
            injection_guard: var_bool("INJECTION_GUARD"),
            gateway_auth: var_bool("GATEWAY_AUTH"),
            audit_enabled: var_bool("AUDIT_ENABLED"),
            allow_localhost_urls: var_bool("ALLOW_LOCALHOST_URLS"),
            shell_timeout_secs: var_parse("SHELL_TIMEOUT_SECS"),
            max_tool_output_chars: var_parse("MAX_TOOL_OUTPUT_CHARS"),
            rate_limit_per_minute: var_parse("RATE_LIMIT_PER_MINUTE"),
            max_request_body_bytes: var_parse("MAX_REQUEST_BODY_BYTES"),
        }
    }
}

/// Price coefficients in dollars per million tokens, by tier, per provider.
/// Overridable model names come from the environment.
pub fn build_llm(config: &EnvConfig) -> LlmManager {
    let mut manager = LlmManager::new(ModelTier::Balanced);

    if let Some(key) = &config.anthropic_api_key {
        manager.register_client(Box::new(AnthropicClient::new(key.clone())));
        manager.add_route(ModelRoute {
            tier: ModelTier::Fast,
            provider: "anthropic".to_string(),
            model: config
                .model_fast
                .clone()
                .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
            input_cost_per_mtok: 0.80,
            output_cost_per_mtok: 4.00,
        });
        manager.add_route(ModelRoute {
            tier: ModelTier::Balanced,
            provider: "anthropic".to_string(),
            model: config
                .model_balanced
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
            input_cost_per_mtok: 3.00,
            output_cost_per_mtok: 15.00,
        });
        manager.add_route(ModelRoute {
            tier: ModelTier::Reasoning,
            provider: "anthropic".to_string(),
            model: config
                .model_reasoning
                .clone()
                .unwrap_or_else(|| "claude-opus-4-20250514".to_string()),
            input_cost_per_mtok: 15.00,
            output_cost_per_mtok: 75.00,
        });
    }

    if let Some(key) = &config.openai_api_key {
        manager.register_client(Box::new(OpenAiClient::new(key.clone())));
        // Only fill tiers Anthropic did not claim, unless OpenAI is the
        // selected provider.
        let openai_selected = config.llm_provider == "openai";
        let claim = |manager: &LlmManager, tier| openai_selected || manager.route_for(tier).is_none();
        if claim(&manager, ModelTier::Fast) {
            manager.add_route(ModelRoute {
                tier: ModelTier::Fast,
                provider: "openai".to_string(),
                model: config
                    .model_fast
                    .clone()
                    .unwrap_or_else(|| "gpt-4.1-mini".to_string()),
                input_cost_per_mtok: 0.40,
                output_cost_per_mtok: 1.60,
            });
        }
        if claim(&manager, ModelTier::Balanced) {
            manager.add_route(ModelRoute {
                tier: ModelTier::Balanced,
                provider: "openai".to_string(),
                model: config
                    .model_balanced
                    .clone()
                    .unwrap_or_else(|| "gpt-4.1".to_string()),
                input_cost_per_mtok: 2.00,
                output_cost_per_mtok: 8.00,
            });
        }
        if claim(&manager, ModelTier::Reasoning) {
            manager.add_route(ModelRoute {
                tier: ModelTier::Reasoning,
                provider: "openai".to_string(),
                model: config
                    .model_reasoning
                    .clone()
                    .unwrap_or_else(|| "o3".to_string()),
                input_cost_per_mtok: 2.00,
                output_cost_per_mtok: 8.00,
            });
        }
    }

    if let Some(base_url) = &config.local_base_url {
        manager.register_client(Box::new(OpenAiClient::compatible(
            "local",
            String::new(),
            format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
        )));
        manager.add_route(ModelRoute {
            tier: ModelTier::Local,
            provider: "local".to_string(),
            model: config
                .model_local
                .clone()
                .unwrap_or_else(|| "llama3.1".to_string()),
            input_cost_per_mtok: 0.0,
            output_cost_per_mtok: 0.0,
        });
    }

    manager
}
