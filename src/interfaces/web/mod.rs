mod auth;
mod handlers;
mod router;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{error, info};

use crate::core::llm::LlmManager;
use crate::core::orchestrator::AgentRegistry;
use crate::security::ratelimit::RateLimiter;
use crate::skills::SkillSet;
use crate::tools::ToolContext;

/// Everything the control-plane handlers touch.
#[derive(Clone)]
pub(crate) struct AppState {
    pub ctx: Arc<ToolContext>,
    pub skills: Arc<SkillSet>,
    pub llm: Arc<LlmManager>,
    pub agents: Arc<AgentRegistry>,
    pub rate: Arc<RateLimiter>,
    pub token: String,
    pub started_at: Instant,
    pub agent_name: String,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
}

/// The JSON control plane + WebSocket event stream, loopback by default.
pub struct ApiServer {
    state: AppState,
    host: String,
    port: u16,
}

impl ApiServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<ToolContext>,
        skills: Arc<SkillSet>,
        llm: Arc<LlmManager>,
        agents: Arc<AgentRegistry>,
        rate: Arc<RateLimiter>,
        token: String,
        host: String,
        port: u16,
        log_tx: tokio::sync::broadcast::Sender<String>,
    ) -> Self {
        let agent_name = ctx.settings.get().agent_name;
        Self {
            state: AppState {
                ctx,
                skills,
                llm,
                agents,
                rate,
                token,
                started_at: Instant::now(),
                agent_name,
                log_tx,
            },
            host,
            port,
        }
    }

    pub async fn start(&self) -> Result<tokio::task::JoinHandle<()>> {
        let app = router::build(self.state.clone(), &self.host, self.port);
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("control plane on http://{}", addr);
        Ok(tokio::spawn(async move {
            let service =
                app.into_make_service_with_connect_info::<std::net::SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                error!("control plane stopped: {}", e);
            }
        }))
    }
}
