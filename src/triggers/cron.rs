use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::warn;

use super::engine::TriggerDispatcher;
use super::Trigger;

/// Arm one cron trigger on the shared scheduler. Registered expressions are
/// standard 5-field; the scheduler wants a seconds field, so one is
/// prepended.
pub async fn arm(
    scheduler: &JobScheduler,
    dispatcher: Arc<TriggerDispatcher>,
    trigger: &Trigger,
) -> Result<()> {
    let Some(expr) = trigger
        .config
        .get("expression")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
    else {
        anyhow::bail!("cron trigger '{}' has no expression", trigger.name);
    };
    let six_field = format!("0 {}", expr);
    let trigger_id = trigger.id.clone();

    let job = Job::new_async(six_field.as_str(), move |_uuid, _lock| {
        let dispatcher = Arc::clone(&dispatcher);
        let trigger_id = trigger_id.clone();
        let expr = expr.clone();
        Box::pin(async move {
            dispatcher
                .fire(&trigger_id, json!({"expression": expr}))
                .await;
        })
    })
    .map_err(|e| anyhow::anyhow!("cron job for '{}' rejected: {}", trigger.name, e))?;

    if let Err(e) = scheduler.add(job).await {
        warn!("cron trigger '{}' not armed: {}", trigger.name, e);
    }
    Ok(())
}
