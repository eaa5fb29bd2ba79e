use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::security::injection::wrap_untrusted;
use crate::security::urls::validate_url;

const FETCH_TIMEOUT_SECS: u64 = 15;
const BODY_MAX_CHARS: usize = 30_000;

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Web,
        "web_fetch",
        "Fetch a public http(s) URL and return the response body as text.",
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "Absolute http or https URL"}
            },
            "required": ["url"]
        }),
        Arc::new(WebFetch),
    );
}

struct WebFetch;

#[async_trait]
impl ToolHandler for WebFetch {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let raw = req_str(&args, "url")?;
        let settings = ctx.settings.get();

        // SSRF check runs before any network I/O.
        let url = if settings.ssrf_protection {
            validate_url(raw, settings.allow_localhost_urls)?
        } else {
            url::Url::parse(raw)
                .map_err(|e| AgentError::validation(format!("invalid URL: {}", e)))?
        };

        if let Some(host) = url.host_str() {
            if !settings.domain_allowed(host) {
                return Err(AgentError::security(format!(
                    "domain '{}' is not allowed by policy",
                    host
                )));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| AgentError::transport(e.to_string()))?;

        let res = client
            .get(url.clone())
            .header("User-Agent", "Mozilla/5.0 (compatible; famulus/0.4)")
            .send()
            .await
            .map_err(|e| AgentError::transport(format!("fetch failed: {}", e)))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| AgentError::transport(format!("body read failed: {}", e)))?;

        let truncated = if body.chars().count() > BODY_MAX_CHARS {
            let cut: String = body.chars().take(BODY_MAX_CHARS).collect();
            format!("{}\n… [body truncated at {} chars]", cut, BODY_MAX_CHARS)
        } else {
            body
        };

        let payload = if settings.injection_guard {
            wrap_untrusted(&format!("web:{}", url.host_str().unwrap_or("?")), &truncated)
        } else {
            truncated
        };

        Ok(format!("HTTP {}\n\n{}", status.as_u16(), payload))
    }
}
