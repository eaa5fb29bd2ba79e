use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, warn};

use super::engine::TriggerDispatcher;
use super::Trigger;

const DEFAULT_POLL_MINUTES: u64 = 5;

#[derive(Debug, Clone)]
pub struct EmailSummary {
    pub uid: u32,
    pub from: String,
    pub subject: String,
    pub date: String,
}

/// Synchronous IMAP poll: UNSEEN uids above `min_uid`, with envelope
/// summaries. Runs inside `spawn_blocking`.
pub fn fetch_unseen_summaries(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    min_uid: u32,
) -> Result<Vec<EmailSummary>> {
    let port = if port == 0 { 993 } else { port };
    let tls = native_tls::TlsConnector::builder()
        .build()
        .context("TLS setup failed")?;
    let client = imap::connect((host, port), host, &tls)
        .with_context(|| format!("IMAP connect to {}:{} failed", host, port))?;
    let mut session = client
        .login(username, password)
        .map_err(|(e, _)| e)
        .context("IMAP login failed")?;

    session.select("INBOX").context("cannot select INBOX")?;
    let uids = session.uid_search("UNSEEN").context("UNSEEN search failed")?;
    let mut wanted: Vec<u32> = uids.into_iter().filter(|uid| *uid > min_uid).collect();
    wanted.sort_unstable();

    let mut out = Vec::new();
    if !wanted.is_empty() {
        let set = wanted
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let messages = session
            .uid_fetch(&set, "(UID ENVELOPE)")
            .context("UID FETCH failed")?;
        for message in messages.iter() {
            let Some(uid) = message.uid else { continue };
            let envelope = message.envelope();
            let subject = envelope
                .and_then(|e| e.subject.as_ref())
                .map(|s| String::from_utf8_lossy(s).to_string())
                .unwrap_or_default();
            let from = envelope
                .and_then(|e| e.from.as_ref())
                .and_then(|addrs| addrs.first())
                .map(|a| {
                    let mailbox = a
                        .mailbox
                        .as_ref()
                        .map(|m| String::from_utf8_lossy(m).to_string())
                        .unwrap_or_default();
                    let host = a
                        .host
                        .as_ref()
                        .map(|h| String::from_utf8_lossy(h).to_string())
                        .unwrap_or_default();
                    format!("{}@{}", mailbox, host)
                })
                .unwrap_or_default();
            let date = envelope
                .and_then(|e| e.date.as_ref())
                .map(|d| String::from_utf8_lossy(d).to_string())
                .unwrap_or_default();
            out.push(EmailSummary {
                uid,
                from,
                subject,
                date,
            });
        }
    }

    let _ = session.logout();
    Ok(out)
}

fn matches_filters(summary: &EmailSummary, from_filter: &str, subject_filter: &str) -> bool {
    let from_ok = from_filter.is_empty()
        || summary.from.to_lowercase().contains(&from_filter.to_lowercase());
    let subject_ok = subject_filter.is_empty()
        || summary
            .subject
            .to_lowercase()
            .contains(&subject_filter.to_lowercase());
    from_ok && subject_ok
}

/// Poll the configured inbox; fire once per matching unseen message and
/// advance the per-trigger UID watermark so restarts never re-deliver.
pub fn spawn(dispatcher: Arc<TriggerDispatcher>, trigger: Trigger) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = trigger
            .config
            .get("poll_minutes")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_POLL_MINUTES)
            .max(1);
        let from_filter = trigger
            .config
            .get("from_contains")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let subject_filter = trigger
            .config
            .get("subject_contains")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        loop {
            tokio::time::sleep(Duration::from_secs(interval * 60)).await;

            let email = dispatcher.settings().integrations.email;
            if !email.is_configured() {
                debug!("email_watch '{}': account not configured", trigger.name);
                continue;
            }
            let watermark = dispatcher
                .registry()
                .get(&trigger.id)
                .and_then(|t| t.config.get("last_seen_uid").and_then(|v| v.as_u64()))
                .unwrap_or(0) as u32;

            let host = email.imap_host.clone();
            let username = email.username.clone();
            let password = email.password.clone();
            let port = email.imap_port;
            let summaries = tokio::task::spawn_blocking(move || {
                fetch_unseen_summaries(&host, port, &username, &password, watermark)
            })
            .await;

            let summaries = match summaries {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => {
                    warn!("email_watch '{}' poll failed: {}", trigger.name, e);
                    continue;
                }
                Err(e) => {
                    warn!("email_watch '{}' join failed: {}", trigger.name, e);
                    continue;
                }
            };

            let mut highest = watermark;
            for summary in &summaries {
                highest = highest.max(summary.uid);
                if matches_filters(summary, &from_filter, &subject_filter) {
                    dispatcher
                        .fire(
                            &trigger.id,
                            json!({
                                "uid": summary.uid,
                                "from": summary.from,
                                "subject": summary.subject,
                                "date": summary.date,
                            }),
                        )
                        .await;
                }
            }
            if highest > watermark {
                if let Err(e) = dispatcher
                    .registry()
                    .update_config(&trigger.id, "last_seen_uid", json!(highest))
                {
                    warn!("email_watch '{}' watermark update failed: {}", trigger.name, e);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(from: &str, subject: &str) -> EmailSummary {
        EmailSummary {
            uid: 1,
            from: from.to_string(),
            subject: subject.to_string(),
            date: "Mon, 1 Jan 2026 09:00:00 +0000".to_string(),
        }
    }

    #[test]
    fn filters_match_substrings_case_insensitively() {
        let s = summary("Boss <boss@corp.example>", "URGENT: quarterly numbers");
        assert!(matches_filters(&s, "boss@corp", "urgent"));
        assert!(matches_filters(&s, "", "quarterly"));
        assert!(matches_filters(&s, "BOSS@", ""));
        assert!(!matches_filters(&s, "noreply@", ""));
        assert!(!matches_filters(&s, "", "invoice"));
    }

    #[test]
    fn empty_filters_match_everything() {
        assert!(matches_filters(&summary("a@b.c", "anything"), "", ""));
    }
}
