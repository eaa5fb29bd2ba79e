use std::path::PathBuf;
use std::sync::Arc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::engine::TriggerDispatcher;
use super::Trigger;

/// Recursive directory watcher. Relative paths are rooted at the workspace;
/// an optional filename regex filters events.
pub fn spawn(
    dispatcher: Arc<TriggerDispatcher>,
    trigger: Trigger,
    workspace: &std::path::Path,
) -> Option<(RecommendedWatcher, tokio::task::JoinHandle<()>)> {
    let raw_path = trigger.config.get("path").and_then(|v| v.as_str())?;
    let watch_path = if PathBuf::from(raw_path).is_absolute() {
        PathBuf::from(raw_path)
    } else {
        workspace.join(raw_path)
    };
    let pattern = trigger
        .config
        .get("pattern")
        .and_then(|v| v.as_str())
        .and_then(|p| Regex::new(p).ok());

    let (tx, mut rx) = mpsc::channel::<Event>(64);
    let mut watcher = match RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            if let Ok(event) = result {
                let _ = tx.blocking_send(event);
            }
        },
        Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("file_watch '{}': watcher setup failed: {}", trigger.name, e);
            return None;
        }
    };
    if let Err(e) = watcher.watch(&watch_path, RecursiveMode::Recursive) {
        warn!(
            "file_watch '{}': cannot watch {:?}: {}",
            trigger.name, watch_path, e
        );
        return None;
    }
    info!("file_watch '{}' watching {:?}", trigger.name, watch_path);

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let kind = event_kind_label(&event.kind);
            for path in &event.paths {
                let filename = path
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default();
                if let Some(re) = &pattern {
                    if !re.is_match(&filename) {
                        continue;
                    }
                }
                dispatcher
                    .fire(
                        &trigger.id,
                        json!({
                            "eventType": kind,
                            "filename": filename,
                            "path": path.to_string_lossy(),
                        }),
                    )
                    .await;
            }
        }
    });

    Some((watcher, handle))
}

fn event_kind_label(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Create(_) => "create",
        EventKind::Modify(_) => "modify",
        EventKind::Remove(_) => "remove",
        EventKind::Access(_) => "access",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds_map_to_labels() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        assert_eq!(
            event_kind_label(&EventKind::Create(CreateKind::File)),
            "create"
        );
        assert_eq!(
            event_kind_label(&EventKind::Modify(ModifyKind::Any)),
            "modify"
        );
        assert_eq!(
            event_kind_label(&EventKind::Remove(RemoveKind::File)),
            "remove"
        );
    }
}
