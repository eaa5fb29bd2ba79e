use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{opt_str, opt_u64, req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;
use crate::security::injection::wrap_untrusted;

const HTTP_TIMEOUT_SECS: u64 = 15;

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Email,
        "email_send",
        "Send an email through the configured SMTP account.",
        json!({
            "type": "object",
            "properties": {
                "to": {"type": "string"},
                "subject": {"type": "string"},
                "body": {"type": "string"}
            },
            "required": ["to", "subject", "body"]
        }),
        Arc::new(EmailSend),
    );
    reg.register(
        ToolCategory::Email,
        "email_read",
        "Read recent unseen messages from the configured IMAP inbox.",
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "description": "Max messages, default 5"}
            }
        }),
        Arc::new(EmailRead),
    );
    reg.register(
        ToolCategory::Social,
        "github_api",
        "Call the GitHub REST API with the configured token.",
        json!({
            "type": "object",
            "properties": {
                "method": {"type": "string", "enum": ["GET", "POST", "PATCH", "DELETE"]},
                "path": {"type": "string", "description": "e.g. /repos/owner/name/issues"},
                "body": {"type": "object"}
            },
            "required": ["path"]
        }),
        Arc::new(GithubApi),
    );
    reg.register(
        ToolCategory::Social,
        "mastodon_post",
        "Post a status to the configured Mastodon account.",
        json!({
            "type": "object",
            "properties": {
                "status": {"type": "string"}
            },
            "required": ["status"]
        }),
        Arc::new(MastodonPost),
    );
    reg.register(
        ToolCategory::Social,
        "reddit_post",
        "Submit a text post to a subreddit with the configured account.",
        json!({
            "type": "object",
            "properties": {
                "subreddit": {"type": "string"},
                "title": {"type": "string"},
                "text": {"type": "string"}
            },
            "required": ["subreddit", "title", "text"]
        }),
        Arc::new(RedditPost),
    );
}

fn http_client() -> Result<reqwest::Client, AgentError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| AgentError::transport(e.to_string()))
}

/// Integration tools are double-gated: the category permission flag and the
/// presence of credentials. Missing credentials are a guard rejection.
fn require_credential(value: &str, what: &str) -> Result<(), AgentError> {
    if value.is_empty() {
        Err(AgentError::security(format!("{} is not configured", what)))
    } else {
        Ok(())
    }
}

struct EmailSend;

#[async_trait]
impl ToolHandler for EmailSend {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let to = req_str(&args, "to")?.to_string();
        let subject = req_str(&args, "subject")?.to_string();
        let body = req_str(&args, "body")?.to_string();
        if !to.contains('@') || to.contains(' ') {
            return Err(AgentError::validation(format!("invalid recipient '{}'", to)));
        }

        let email = ctx.settings.get().integrations.email;
        require_credential(&email.smtp_host, "SMTP host")?;
        require_credential(&email.username, "email account")?;

        let message = lettre::Message::builder()
            .from(
                email
                    .username
                    .parse()
                    .map_err(|e| AgentError::validation(format!("bad from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| AgentError::validation(format!("bad to address: {}", e)))?)
            .subject(&subject)
            .body(body)
            .map_err(|e| AgentError::validation(format!("cannot build message: {}", e)))?;

        let transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor> =
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(&email.smtp_host)
                .map_err(|e| AgentError::transport(format!("SMTP relay setup failed: {}", e)))?
                .port(if email.smtp_port > 0 { email.smtp_port } else { 587 })
                .credentials(lettre::transport::smtp::authentication::Credentials::new(
                    email.username.clone(),
                    email.password.clone(),
                ))
                .build();

        use lettre::AsyncTransport;
        transport
            .send(message)
            .await
            .map_err(|e| AgentError::transport(format!("SMTP send failed: {}", e)))?;

        info!("email sent to {}", to);
        Ok(format!("email sent to {} ({})", to, subject))
    }
}

struct EmailRead;

#[async_trait]
impl ToolHandler for EmailRead {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let limit = opt_u64(&args, "limit").unwrap_or(5).min(20) as usize;
        let settings = ctx.settings.get();
        let email = settings.integrations.email;
        require_credential(&email.imap_host, "IMAP host")?;
        require_credential(&email.username, "email account")?;

        let inject = settings.injection_guard;
        let summaries = tokio::task::spawn_blocking(move || {
            crate::triggers::fetch_unseen_summaries(
                &email.imap_host,
                email.imap_port,
                &email.username,
                &email.password,
                0,
            )
        })
        .await
        .map_err(|e| AgentError::transport(e.to_string()))?
        .map_err(|e| AgentError::transport(format!("IMAP poll failed: {}", e)))?;

        if summaries.is_empty() {
            return Ok("no unseen messages".to_string());
        }
        let mut out = String::new();
        for msg in summaries.iter().take(limit) {
            out.push_str(&format!(
                "uid {} | from {} | {} | {}\n",
                msg.uid, msg.from, msg.date, msg.subject
            ));
        }
        if inject {
            Ok(wrap_untrusted("imap:inbox", &out))
        } else {
            Ok(out)
        }
    }
}

struct GithubApi;

#[async_trait]
impl ToolHandler for GithubApi {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let path = req_str(&args, "path")?;
        if !path.starts_with('/') {
            return Err(AgentError::validation("path must start with '/'"));
        }
        let settings = ctx.settings.get();
        require_credential(&settings.integrations.github_token, "GitHub token")?;

        let method = match opt_str(&args, "method").unwrap_or("GET") {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            other => {
                return Err(AgentError::validation(format!(
                    "unsupported method '{}'",
                    other
                )));
            }
        };

        let mut request = http_client()?
            .request(method, format!("https://api.github.com{}", path))
            .header("Authorization", format!("Bearer {}", settings.integrations.github_token))
            .header("User-Agent", "famulus-agent")
            .header("Accept", "application/vnd.github+json");
        if let Some(body) = args.get("body") {
            request = request.json(body);
        }

        let res = request
            .send()
            .await
            .map_err(|e| AgentError::transport(format!("GitHub request failed: {}", e)))?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        let text: String = text.chars().take(10_000).collect();

        let payload = if settings.injection_guard {
            wrap_untrusted("github-api", &text)
        } else {
            text
        };
        Ok(format!("HTTP {}\n{}", status.as_u16(), payload))
    }
}

struct MastodonPost;

#[async_trait]
impl ToolHandler for MastodonPost {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let status = req_str(&args, "status")?;
        let settings = ctx.settings.get();
        require_credential(&settings.integrations.mastodon_base_url, "Mastodon base URL")?;
        require_credential(&settings.integrations.mastodon_token, "Mastodon token")?;

        let res = http_client()?
            .post(format!(
                "{}/api/v1/statuses",
                settings.integrations.mastodon_base_url.trim_end_matches('/')
            ))
            .header(
                "Authorization",
                format!("Bearer {}", settings.integrations.mastodon_token),
            )
            .json(&json!({"status": status}))
            .send()
            .await
            .map_err(|e| AgentError::transport(format!("Mastodon request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AgentError::transport(format!(
                "Mastodon API error {}",
                res.status()
            )));
        }
        Ok("status posted".to_string())
    }
}

struct RedditPost;

#[async_trait]
impl ToolHandler for RedditPost {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let subreddit = req_str(&args, "subreddit")?;
        let title = req_str(&args, "title")?;
        let text = req_str(&args, "text")?;
        let settings = ctx.settings.get();
        let creds = &settings.integrations;
        require_credential(&creds.reddit_client_id, "Reddit client id")?;
        require_credential(&creds.reddit_username, "Reddit account")?;

        let client = http_client()?;
        // Script-app password grant, then submit.
        let token_res = client
            .post("https://www.reddit.com/api/v1/access_token")
            .basic_auth(&creds.reddit_client_id, Some(&creds.reddit_client_secret))
            .header("User-Agent", "famulus-agent")
            .form(&[
                ("grant_type", "password"),
                ("username", creds.reddit_username.as_str()),
                ("password", creds.reddit_password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AgentError::transport(format!("Reddit auth failed: {}", e)))?;
        let token: Value = token_res
            .json()
            .await
            .map_err(|e| AgentError::transport(e.to_string()))?;
        let access = token
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::transport("Reddit auth returned no token"))?;

        let res = client
            .post("https://oauth.reddit.com/api/submit")
            .header("Authorization", format!("Bearer {}", access))
            .header("User-Agent", "famulus-agent")
            .form(&[
                ("sr", subreddit),
                ("kind", "self"),
                ("title", title),
                ("text", text),
                ("api_type", "json"),
            ])
            .send()
            .await
            .map_err(|e| AgentError::transport(format!("Reddit submit failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AgentError::transport(format!(
                "Reddit API error {}",
                res.status()
            )));
        }
        Ok(format!("posted to r/{}", subreddit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, context};
    use tempfile::tempdir;

    #[tokio::test]
    async fn integration_tools_hidden_until_permitted() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        let reg = ToolRegistry::with_builtins();
        let settings = ctx.settings.get();
        // Email and social categories default to off.
        let names: Vec<String> = reg
            .definitions(&settings)
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert!(!names.contains(&"email_send".to_string()));
        assert!(!names.contains(&"mastodon_post".to_string()));

        ctx.settings
            .update(&json!({"allow_email": true, "allow_social": true}), &[])
            .unwrap();
        let names: Vec<String> = reg
            .definitions(&ctx.settings.get())
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert!(names.contains(&"email_send".to_string()));
        assert!(names.contains(&"reddit_post".to_string()));
    }

    #[tokio::test]
    async fn missing_credentials_are_a_guard_rejection() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        ctx.settings
            .update(&json!({"allow_email": true, "allow_social": true}), &[])
            .unwrap();
        let reg = ToolRegistry::with_builtins();

        let result = reg
            .execute(
                &ctx,
                &call(
                    "email_send",
                    json!({"to": "a@example.com", "subject": "hi", "body": "test"}),
                ),
                "web",
                "u",
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("Security violation"));

        let result = reg
            .execute(
                &ctx,
                &call("github_api", json!({"path": "/user"})),
                "web",
                "u",
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("not configured"));
    }

    #[tokio::test]
    async fn invalid_recipient_is_validation_error() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path()).await;
        ctx.settings.update(&json!({"allow_email": true}), &[]).unwrap();
        let reg = ToolRegistry::with_builtins();
        let result = reg
            .execute(
                &ctx,
                &call(
                    "email_send",
                    json!({"to": "not an address", "subject": "s", "body": "b"}),
                ),
                "web",
                "u",
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("Invalid input"));
    }
}
