use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{self, EnvConfig};
use crate::core::approvals::ApprovalBroker;
use crate::core::cost::CostTracker;
use crate::core::events::event_bus;
use crate::core::memory::{MarkdownMemory, Memory};
use crate::core::orchestrator::{AgentRegistry, ModelRouter, Orchestrator};
use crate::core::session::{InboundMessage, SessionLoop};
use crate::core::settings::SettingsStore;
use crate::core::tasks::TaskStore;
use crate::heartbeat::Heartbeat;
use crate::interfaces::channel::{self, ChannelRouter};
use crate::interfaces::web::ApiServer;
use crate::security::audit::AuditLog;
use crate::security::gateway;
use crate::security::ratelimit::RateLimiter;
use crate::skills::SkillSet;
use crate::tools::{ToolContext, ToolRegistry};
use crate::triggers::{TriggerDispatcher, TriggerEngine, TriggerRegistry, WebhookServer};

/// Handle external channel clients use to feed messages into the kernel.
pub type InboundSender = mpsc::Sender<InboundMessage>;

/// Boot every subsystem, run until ctrl-c, shut down in order. Startup
/// failures here are fatal by design.
pub async fn run() -> Result<()> {
    let env = EnvConfig::load();
    let workspace = env.workspace.clone();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("cannot create workspace {:?}", workspace))?;
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("cannot resolve workspace {:?}", workspace))?;

    let log_tx = crate::logging::init();
    info!("famulus starting in {:?}", workspace);

    // Singletons, leaves first.
    let gateway_token = gateway::load_or_create_token(&workspace)?;
    let settings = Arc::new(SettingsStore::open(&workspace, gateway_token.clone())?);
    apply_env_overrides(&settings, &env)?;
    let audit = Arc::new(AuditLog::open(&workspace, settings.get().audit_enabled)?);
    let events = event_bus();
    let cost = Arc::new(CostTracker::open(&workspace)?);
    let tasks = Arc::new(TaskStore::open(&workspace)?);
    let approvals = ApprovalBroker::open(&workspace, events.clone())?;
    let triggers = Arc::new(TriggerRegistry::open(&workspace)?);
    let memory: Arc<dyn Memory> = Arc::new(MarkdownMemory::open(&workspace)?);
    let skills = Arc::new(SkillSet::load(&workspace.join("skills"))?);
    let llm = Arc::new(config::build_llm(&env));
    let rate = Arc::new(RateLimiter::new());

    let (orchestrate_tx, orchestrate_rx) = mpsc::channel(32);
    let ctx = Arc::new(ToolContext {
        workspace: workspace.clone(),
        settings: Arc::clone(&settings),
        cost: Arc::clone(&cost),
        tasks: Arc::clone(&tasks),
        approvals: Arc::clone(&approvals),
        triggers: Arc::clone(&triggers),
        memory,
        audit: Arc::clone(&audit),
        events: events.clone(),
        orchestrate_tx,
    });

    let registry = Arc::new(ToolRegistry::with_builtins());
    let session = Arc::new(SessionLoop::new(
        Arc::clone(&ctx),
        registry,
        Arc::clone(&llm),
        Arc::clone(&skills),
    ));

    let agents = Arc::new(AgentRegistry::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&session),
        Arc::clone(&llm),
        ModelRouter::new(Arc::clone(&llm), Arc::clone(&cost)),
        Arc::clone(&agents),
    ));
    let orchestrator_handle = orchestrator.spawn_service(orchestrate_rx);

    // Channel plumbing: clients register sinks and push inbound messages.
    let outbound = Arc::new(ChannelRouter::new());
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let dispatcher_handle = channel::spawn_dispatcher(
        inbound_rx,
        Arc::clone(&session),
        Arc::clone(&outbound),
        Arc::clone(&rate),
        env.allowed_user_ids.clone(),
    );
    // The sender stays alive for the life of the process; concrete channel
    // clients (Telegram/Discord adapters) clone it when they attach.
    let _inbound: InboundSender = inbound_tx;

    // Event plane.
    let trigger_dispatcher = Arc::new(TriggerDispatcher::new(
        Arc::clone(&triggers),
        Arc::clone(&session),
        Arc::clone(&outbound),
    ));
    let mut engine = TriggerEngine::new(Arc::clone(&trigger_dispatcher), workspace.clone());
    engine.start().await?;
    let webhook_handle = WebhookServer::new(
        trigger_dispatcher,
        env.gateway_host.clone(),
        env.webhook_port,
    )
    .start()
    .await?;

    let mut heartbeat = Heartbeat::new(
        Arc::clone(&session),
        Arc::clone(&outbound),
        workspace.clone(),
        env.heartbeat_channel.clone(),
    );
    if env.heartbeat_enabled {
        heartbeat.start();
    }

    // Control plane last: by now every index it exposes is loaded.
    let api_handle = ApiServer::new(
        Arc::clone(&ctx),
        skills,
        llm,
        agents,
        rate,
        gateway_token,
        env.gateway_host.clone(),
        env.gateway_port,
        log_tx,
    )
    .start()
    .await?;

    info!("famulus ready");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    heartbeat.stop();
    engine.stop().await;
    webhook_handle.abort();
    api_handle.abort();
    dispatcher_handle.abort();
    orchestrator_handle.abort();
    audit.flush();
    Ok(())
}

fn apply_env_overrides(settings: &SettingsStore, env: &EnvConfig) -> Result<()> {
    settings.apply_env_overrides(|s| {
        if let Some(name) = &env.agent_name {
            s.agent_name = name.clone();
        }
        if let Some(level) = env.autonomy {
            s.autonomy_level = level;
        }
        if let Some(v) = env.max_tool_calls {
            s.max_tool_calls = v;
        }
        if let Some(v) = env.heartbeat_interval_minutes {
            s.heartbeat_interval_minutes = v;
        }
        if let Some(v) = env.sandbox_enabled {
            s.sandbox_enabled = v;
        }
        if let Some(v) = env.ssrf_protection {
            s.ssrf_protection = v;
        }
        if let Some(v) = env.injection_guard {
            s.injection_guard = v;
        }
        if let Some(v) = env.gateway_auth {
            s.gateway_auth = v;
        }
        if let Some(v) = env.audit_enabled {
            s.audit_enabled = v;
        }
        if let Some(v) = env.allow_localhost_urls {
            s.allow_localhost_urls = v;
        }
        if let Some(v) = env.shell_timeout_secs {
            s.shell_timeout_secs = v;
        }
        if let Some(v) = env.max_tool_output_chars {
            s.max_tool_output_chars = v;
        }
        if let Some(v) = env.rate_limit_per_minute {
            s.rate_limit_per_minute = v;
        }
        if let Some(v) = env.max_request_body_bytes {
            s.max_request_body_bytes = v;
        }
    })
}
