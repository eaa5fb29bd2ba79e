use std::sync::Arc;

use anyhow::Result;
use notify::RecommendedWatcher;
use serde_json::Value;
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};

use super::{calendar, cron, email_watch, file_watch, ActionKind, Trigger, TriggerRegistry, TriggerType};
use crate::core::events::{publish, AgentEvent};
use crate::core::session::SessionLoop;
use crate::core::settings::RuntimeSettings;
use crate::core::tasks::NewTask;
use crate::interfaces::channel::ChannelRouter;

/// Shared fire-path for every trigger source (watchers, cron, webhook,
/// pollers): stamp the registry, publish the event, run the configured
/// action through the session loop.
pub struct TriggerDispatcher {
    registry: Arc<TriggerRegistry>,
    session: Arc<SessionLoop>,
    outbound: Arc<ChannelRouter>,
}

impl TriggerDispatcher {
    pub fn new(
        registry: Arc<TriggerRegistry>,
        session: Arc<SessionLoop>,
        outbound: Arc<ChannelRouter>,
    ) -> Self {
        Self {
            registry,
            session,
            outbound,
        }
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.session.ctx.settings.get()
    }

    pub async fn fire(&self, trigger_id: &str, payload: Value) {
        let trigger = match self.registry.record_fire(trigger_id) {
            Ok(Some(trigger)) => trigger,
            Ok(None) => {
                warn!("fire for unknown trigger {}", trigger_id);
                return;
            }
            Err(e) => {
                warn!("trigger {} fire not persisted: {}", trigger_id, e);
                match self.registry.get(trigger_id) {
                    Some(t) => t,
                    None => return,
                }
            }
        };
        if !trigger.enabled {
            return;
        }

        info!("trigger '{}' fired ({})", trigger.name, trigger.trigger_type.as_str());
        publish(
            &self.session.ctx.events,
            AgentEvent::TriggerFired {
                id: trigger.id.clone(),
                name: trigger.name.clone(),
                trigger_type: trigger.trigger_type.as_str().to_string(),
            },
        );

        match trigger.action.kind {
            ActionKind::Message => {
                match self.session.handle_trigger(&trigger, &payload).await {
                    Ok(Some(reply)) => {
                        if let Some(channel) = &trigger.action.channel {
                            let user = trigger.action.user.as_deref().unwrap_or("system");
                            self.outbound.deliver(channel, user, &reply).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("trigger '{}' turn failed: {}", trigger.name, e),
                }
            }
            ActionKind::Task => {
                let result = self.session.ctx.tasks.create(NewTask {
                    title: trigger.action.content.chars().take(80).collect(),
                    description: format!(
                        "{}\n\nTrigger payload:\n{}",
                        trigger.action.content, payload
                    ),
                    source_channel: trigger
                        .action
                        .channel
                        .clone()
                        .unwrap_or_else(|| "trigger".to_string()),
                    source_user: trigger
                        .action
                        .user
                        .clone()
                        .unwrap_or_else(|| "system".to_string()),
                    ..Default::default()
                });
                if let Err(e) = result {
                    warn!("trigger '{}' task creation failed: {}", trigger.name, e);
                }
            }
        }
    }
}

/// Owns the live side of the trigger registry: the cron scheduler, file
/// watchers, and poll loops. Webhooks are served by `WebhookServer`, which
/// shares the dispatcher.
pub struct TriggerEngine {
    dispatcher: Arc<TriggerDispatcher>,
    workspace: std::path::PathBuf,
    scheduler: Option<JobScheduler>,
    watchers: Vec<RecommendedWatcher>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TriggerEngine {
    pub fn new(dispatcher: Arc<TriggerDispatcher>, workspace: std::path::PathBuf) -> Self {
        Self {
            dispatcher,
            workspace,
            scheduler: None,
            watchers: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn dispatcher(&self) -> Arc<TriggerDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Arm every enabled trigger. Called at boot; create_trigger notes that
    /// new triggers arm on the next reload.
    pub async fn start(&mut self) -> Result<()> {
        let triggers: Vec<Trigger> = self
            .dispatcher
            .registry()
            .list()
            .into_iter()
            .filter(|t| t.enabled)
            .collect();

        let needs_cron = triggers.iter().any(|t| t.trigger_type == TriggerType::Cron);
        if needs_cron {
            self.scheduler = Some(JobScheduler::new().await?);
        }

        for trigger in triggers {
            match trigger.trigger_type {
                TriggerType::Cron => {
                    if let Some(scheduler) = &self.scheduler {
                        if let Err(e) =
                            cron::arm(scheduler, self.dispatcher(), &trigger).await
                        {
                            warn!("{}", e);
                        }
                    }
                }
                TriggerType::FileWatch => {
                    if let Some((watcher, handle)) =
                        file_watch::spawn(self.dispatcher(), trigger, &self.workspace)
                    {
                        self.watchers.push(watcher);
                        self.handles.push(handle);
                    }
                }
                TriggerType::Calendar => {
                    self.handles
                        .push(calendar::spawn(self.dispatcher(), trigger));
                }
                TriggerType::EmailWatch => {
                    self.handles
                        .push(email_watch::spawn(self.dispatcher(), trigger));
                }
                TriggerType::Webhook => {
                    // Served by the shared webhook listener.
                }
            }
        }

        if let Some(scheduler) = &mut self.scheduler {
            scheduler.start().await?;
        }
        info!(
            "trigger engine started ({} watchers, {} pollers)",
            self.watchers.len(),
            self.handles.len()
        );
        Ok(())
    }

    /// Close watchers, cancel pollers, shut the scheduler down.
    pub async fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.watchers.clear();
        if let Some(mut scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.shutdown().await {
                warn!("cron scheduler shutdown failed: {}", e);
            }
        }
        info!("trigger engine stopped");
    }
}
