use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{opt_str, req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::core::settings::RuntimeSettings;
use crate::security::injection::wrap_untrusted;
use crate::security::urls::validate_url;

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Browser,
        "browser_action",
        "Drive a headless browser. Actions: navigate, screenshot, click, type, get_text. \
         Every request the page makes is re-checked against the URL policy.",
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["navigate", "screenshot", "click", "type", "get_text"]},
                "url": {"type": "string", "description": "For navigate"},
                "selector": {"type": "string", "description": "For click, type and get_text"},
                "text": {"type": "string", "description": "For type"},
                "filename": {"type": "string", "description": "For screenshot; saved into the workspace"}
            },
            "required": ["action"]
        }),
        Arc::new(BrowserAction::new()),
    );
}

struct BrowserState {
    /// Kept alive for the life of the session; dropping it closes Chromium.
    #[allow(dead_code)]
    browser: Browser,
    page: Page,
}

struct BrowserAction {
    state: Mutex<Option<BrowserState>>,
}

impl BrowserAction {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    async fn launch(&self, settings: &RuntimeSettings) -> Result<BrowserState, AgentError> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(AgentError::transport)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AgentError::transport(format!("browser launch failed: {}", e)))?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AgentError::transport(format!("new page failed: {}", e)))?;

        // Intercept every network request the page makes, not just the
        // top-level navigation, and fail the ones the URL policy rejects.
        page.execute(EnableParams::default())
            .await
            .map_err(|e| AgentError::transport(format!("interception enable failed: {}", e)))?;
        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| AgentError::transport(format!("interception listener failed: {}", e)))?;

        let guard_page = page.clone();
        let ssrf_on = settings.ssrf_protection;
        let allow_localhost = settings.allow_localhost_urls;
        tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let url = event.request.url.clone();
                let allowed = !ssrf_on || validate_url(&url, allow_localhost).is_ok();
                let outcome = if allowed {
                    guard_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                } else {
                    warn!("browser subresource blocked: {}", url);
                    guard_page
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::AccessDenied,
                        ))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = outcome {
                    warn!("browser interception verdict failed: {}", e);
                    break;
                }
            }
        });

        Ok(BrowserState { browser, page })
    }
}

#[async_trait]
impl ToolHandler for BrowserAction {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let action = req_str(&args, "action")?;
        let settings = ctx.settings.get();

        // The navigation target is validated before a browser ever launches.
        if action == "navigate" {
            let raw = req_str(&args, "url")?;
            if settings.ssrf_protection {
                validate_url(raw, settings.allow_localhost_urls)?;
            }
        }

        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.launch(&settings).await?);
        }
        let session = state.as_mut().unwrap();

        match action {
            "navigate" => {
                let raw = req_str(&args, "url")?;
                info!("browser navigate: {}", raw);
                session
                    .page
                    .goto(raw)
                    .await
                    .map_err(|e| AgentError::transport(format!("navigation failed: {}", e)))?;
                let _ = session.page.wait_for_navigation().await;
                let title = session.page.get_title().await.ok().flatten().unwrap_or_default();
                Ok(format!("navigated to {} (title: {})", raw, title))
            }
            "screenshot" => {
                let filename = opt_str(&args, "filename").unwrap_or("screenshot.png");
                let path = crate::security::paths::safe_path(&ctx.workspace, filename)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| AgentError::transport(e.to_string()))?;
                }
                session
                    .page
                    .save_screenshot(
                        ScreenshotParams::builder()
                            .format(CaptureScreenshotFormat::Png)
                            .build(),
                        &path,
                    )
                    .await
                    .map_err(|e| AgentError::transport(format!("screenshot failed: {}", e)))?;
                Ok(format!("screenshot saved to {}", path.display()))
            }
            "click" => {
                let selector = req_str(&args, "selector")?;
                session
                    .page
                    .find_element(selector)
                    .await
                    .map_err(|e| AgentError::validation(format!("selector not found: {}", e)))?
                    .click()
                    .await
                    .map_err(|e| AgentError::transport(format!("click failed: {}", e)))?;
                Ok(format!("clicked {}", selector))
            }
            "type" => {
                let selector = req_str(&args, "selector")?;
                let text = req_str(&args, "text")?;
                let element = session
                    .page
                    .find_element(selector)
                    .await
                    .map_err(|e| AgentError::validation(format!("selector not found: {}", e)))?;
                element
                    .click()
                    .await
                    .map_err(|e| AgentError::transport(e.to_string()))?;
                element
                    .type_str(text)
                    .await
                    .map_err(|e| AgentError::transport(format!("typing failed: {}", e)))?;
                Ok(format!("typed {} chars into {}", text.chars().count(), selector))
            }
            "get_text" => {
                let selector = opt_str(&args, "selector").unwrap_or("body");
                let text = session
                    .page
                    .find_element(selector)
                    .await
                    .map_err(|e| AgentError::validation(format!("selector not found: {}", e)))?
                    .inner_text()
                    .await
                    .map_err(|e| AgentError::transport(e.to_string()))?
                    .unwrap_or_default();
                let url = session
                    .page
                    .url()
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "?".to_string());
                if settings.injection_guard {
                    Ok(wrap_untrusted(&format!("browser:{}", url), &text))
                } else {
                    Ok(text)
                }
            }
            other => {
                // Deliberately no script-evaluation action.
                Err(AgentError::validation(format!(
                    "unsupported browser action '{}'",
                    other
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, context};
    use tempfile::tempdir;

    // Driving a real browser is out of reach for unit tests; the navigation
    // guard runs before any browser is launched, so it is testable.
    #[tokio::test]
    async fn navigate_to_private_address_fails_before_launch() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(
                &ctx,
                &call(
                    "browser_action",
                    json!({"action": "navigate", "url": "gopher://192.168.0.1/"}),
                ),
                "web",
                "u",
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Error: Security violation"));
    }

    #[tokio::test]
    async fn unknown_action_is_validation_error() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(
                &ctx,
                &call("browser_action", json!({"action": "evaluate", "script": "1+1"})),
                "web",
                "u",
            )
            .await;
        assert!(result.is_error);
    }
}
