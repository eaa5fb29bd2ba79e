use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::events::{publish, AgentEvent};
use crate::core::session::SessionLoop;
use crate::interfaces::channel::ChannelRouter;

pub const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

/// Unchecked `- [ ]` items from the heartbeat checklist.
pub fn parse_open_items(markdown: &str) -> Vec<String> {
    markdown
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            trimmed
                .strip_prefix("- [ ]")
                .map(|rest| rest.trim().to_string())
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Periodic self-check: read `HEARTBEAT.md`, and when open items exist run
/// the session loop in heartbeat mode. `HEARTBEAT_OK` replies are
/// suppressed; anything else goes to the configured channel.
pub struct Heartbeat {
    session: Arc<SessionLoop>,
    outbound: Arc<ChannelRouter>,
    workspace: PathBuf,
    channel: Option<String>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new(
        session: Arc<SessionLoop>,
        outbound: Arc<ChannelRouter>,
        workspace: PathBuf,
        channel: Option<String>,
    ) -> Self {
        Self {
            session,
            outbound,
            workspace,
            channel,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        let session = Arc::clone(&self.session);
        let outbound = Arc::clone(&self.outbound);
        let path = self.workspace.join(HEARTBEAT_FILE);
        let channel = self.channel.clone();

        self.handle = Some(tokio::spawn(async move {
            loop {
                let minutes = session
                    .ctx
                    .settings
                    .get()
                    .heartbeat_interval_minutes
                    .max(1);
                tokio::time::sleep(Duration::from_secs(minutes * 60)).await;

                let items = match tokio::fs::read_to_string(&path).await {
                    Ok(text) => parse_open_items(&text),
                    Err(_) => Vec::new(),
                };
                if items.is_empty() {
                    continue;
                }

                info!("heartbeat: {} open items", items.len());
                publish(
                    &session.ctx.events,
                    AgentEvent::HeartbeatTick {
                        pending_items: items.len(),
                    },
                );

                match session.handle_heartbeat(&items).await {
                    Ok(Some(reply)) => {
                        if let Some(channel) = &channel {
                            outbound.deliver(channel, "heartbeat", &reply).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("heartbeat turn failed: {}", e),
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("heartbeat stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unchecked_items_only() {
        let md = "# Heartbeat\n\
                  - [ ] rotate the API keys\n\
                  - [x] already done\n\
                  - [ ]   trim the audit logs  \n\
                  - not a checkbox\n\
                  text\n";
        let items = parse_open_items(md);
        assert_eq!(items, vec!["rotate the API keys", "trim the audit logs"]);
    }

    #[test]
    fn indented_items_count() {
        let md = "  - [ ] nested item\n";
        assert_eq!(parse_open_items(md), vec!["nested item"]);
    }

    #[test]
    fn empty_or_missing_checklist_is_quiet() {
        assert!(parse_open_items("").is_empty());
        assert!(parse_open_items("- [x] all done\n").is_empty());
        assert!(parse_open_items("- [ ]   \n").is_empty());
    }
}
