use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::core::session::{InboundMessage, SessionLoop};
use crate::security::ratelimit::RateLimiter;

/// Outbound side of a chat channel. Concrete clients (Telegram, Discord)
/// live outside the kernel; they implement this and register under their
/// channel name.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, user: &str, text: &str) -> Result<()>;
}

/// Registry of outbound sinks plus the inbound queue feeding the session
/// loop.
pub struct ChannelRouter {
    sinks: Mutex<HashMap<String, Arc<dyn ChannelSink>>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, channel: &str, sink: Arc<dyn ChannelSink>) {
        info!("channel registered: {}", channel);
        self.sinks.lock().await.insert(channel.to_string(), sink);
    }

    /// Deliver a reply. Unknown channels (heartbeat, trigger defaults with
    /// no configured channel) are logged and dropped.
    pub async fn deliver(&self, channel: &str, user: &str, text: &str) {
        let sink = self.sinks.lock().await.get(channel).cloned();
        match sink {
            Some(sink) => {
                if let Err(e) = sink.send(user, text).await {
                    warn!("delivery to {}:{} failed: {}", channel, user, e);
                }
            }
            None => info!("no sink for channel '{}'; dropping reply", channel),
        }
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume inbound messages, enforce the per-user allowlist and rate limit,
/// run the session loop, and route replies back out. Each message gets its
/// own worker so channels never block each other.
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<InboundMessage>,
    session: Arc<SessionLoop>,
    outbound: Arc<ChannelRouter>,
    rate: Arc<RateLimiter>,
    allowed_users: Vec<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if !allowed_users.is_empty() && !allowed_users.contains(&msg.user) {
                warn!("message from unlisted user '{}' ignored", msg.user);
                continue;
            }
            let limit = session.ctx.settings.get().rate_limit_per_minute;
            if !rate.check(&format!("user:{}", msg.user), limit) {
                outbound
                    .deliver(
                        &msg.channel,
                        &msg.user,
                        "You're sending messages too quickly. Give me a moment.",
                    )
                    .await;
                continue;
            }

            let session = Arc::clone(&session);
            let outbound = Arc::clone(&outbound);
            tokio::spawn(async move {
                match session.handle_message(&msg).await {
                    Ok(Some(reply)) => outbound.deliver(&msg.channel, &msg.user, &reply).await,
                    Ok(None) => {}
                    Err(e) => {
                        warn!("turn for {}:{} failed: {}", msg.channel, msg.user, e);
                        outbound
                            .deliver(
                                &msg.channel,
                                &msg.user,
                                &format!("Something went wrong: {}", e),
                            )
                            .await;
                    }
                }
            });
        }
    })
}
