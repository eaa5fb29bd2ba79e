use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::llm::ChatTurn;

/// Soft cap on turns kept verbatim; older turns fold into the summary.
const THREAD_SOFT_CAP: usize = 100;
/// How many recent turns survive a trim.
const THREAD_KEEP: usize = 60;
/// The running summary never grows past this.
const SUMMARY_MAX_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    pub channel: String,
    pub user: String,
    pub turns: Vec<ChatTurn>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn new(channel: &str, user: &str) -> Self {
        let now = Utc::now();
        Self {
            channel: channel.to_string(),
            user: user.to_string(),
            turns: Vec::new(),
            summary: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fold the oldest turns into the bounded summary once the thread exceeds
/// the soft cap. Idempotent: a trimmed thread is left untouched.
pub fn trim_thread(thread: &mut ConversationThread) {
    if thread.turns.len() <= THREAD_SOFT_CAP {
        return;
    }
    let cut = thread.turns.len() - THREAD_KEEP;
    let folded: Vec<ChatTurn> = thread.turns.drain(..cut).collect();
    for turn in folded {
        let line: String = turn.content.chars().take(120).collect();
        if line.is_empty() {
            continue;
        }
        thread.summary.push_str(&format!("{}: {}\n", turn.role, line));
    }
    if thread.summary.chars().count() > SUMMARY_MAX_CHARS {
        // Keep the newest tail of the summary.
        let tail: String = thread
            .summary
            .chars()
            .skip(thread.summary.chars().count() - SUMMARY_MAX_CHARS)
            .collect();
        thread.summary = tail;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub name: String,
    pub content: String,
}

/// External memory collaborator: conversation threads plus the long-term
/// markdown store behind `remember`/`recall`.
#[async_trait]
pub trait Memory: Send + Sync {
    async fn load_thread(&self, channel: &str, user: &str) -> Result<ConversationThread>;
    async fn save_thread(&self, thread: &ConversationThread) -> Result<()>;
    async fn remember(&self, topic: &str, content: &str) -> Result<String>;
    async fn recall(&self, query: &str) -> Result<Vec<MemoryEntry>>;
    /// Condensed bullets for the system prompt.
    async fn bullets(&self, limit: usize) -> Result<Vec<String>>;
    async fn entry_count(&self) -> Result<usize>;
}

/// Default implementation: YAML-frontmatter markdown entries under
/// `memory/`, conversation threads as JSON under `memory/threads/`.
pub struct MarkdownMemory {
    root: PathBuf,
    threads: PathBuf,
}

impl MarkdownMemory {
    pub fn open(workspace: &std::path::Path) -> Result<Self> {
        let root = workspace.join("memory");
        let threads = root.join("threads");
        std::fs::create_dir_all(&threads)
            .with_context(|| format!("cannot create memory directory {:?}", threads))?;
        Ok(Self { root, threads })
    }

    fn thread_path(&self, channel: &str, user: &str) -> PathBuf {
        self.threads
            .join(format!("{}--{}.json", slug(channel), slug(user)))
    }

    fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let Ok(dir) = std::fs::read_dir(&self.root) else {
            return out;
        };
        let mut paths: Vec<PathBuf> = dir
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        paths.sort();
        for path in paths {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            match std::fs::read_to_string(&path) {
                Ok(text) => out.push((name, text)),
                Err(e) => warn!("unreadable memory entry {:?}: {}", path, e),
            }
        }
        out
    }
}

fn slug(s: &str) -> String {
    let slugged: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = slugged.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "entry".to_string()
    } else {
        trimmed
    }
}

/// Split optional `---` YAML frontmatter from a markdown body.
fn split_frontmatter(text: &str) -> (Option<serde_yaml::Value>, &str) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("---") {
        if let Some(end) = rest.find("\n---") {
            let yaml = &rest[..end];
            let body = rest[end + 4..].trim_start_matches('\n');
            return (serde_yaml::from_str(yaml).ok(), body);
        }
    }
    (None, text)
}

#[async_trait]
impl Memory for MarkdownMemory {
    async fn load_thread(&self, channel: &str, user: &str) -> Result<ConversationThread> {
        let path = self.thread_path(channel, user);
        if !path.exists() {
            return Ok(ConversationThread::new(channel, user));
        }
        let text = tokio::fs::read_to_string(&path).await?;
        match serde_json::from_str(&text) {
            Ok(thread) => Ok(thread),
            Err(e) => {
                warn!("corrupt thread {:?} ({}), starting fresh", path, e);
                Ok(ConversationThread::new(channel, user))
            }
        }
    }

    async fn save_thread(&self, thread: &ConversationThread) -> Result<()> {
        let mut thread = thread.clone();
        thread.updated_at = Utc::now();
        trim_thread(&mut thread);
        let path = self.thread_path(&thread.channel, &thread.user);
        let data = serde_json::to_string_pretty(&thread)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remember(&self, topic: &str, content: &str) -> Result<String> {
        let name = slug(topic);
        let path = self.root.join(format!("{}.md", name));
        let doc = format!(
            "---\ntitle: {}\ncreated: {}\n---\n\n{}\n",
            topic,
            Utc::now().to_rfc3339(),
            content
        );
        tokio::fs::write(&path, doc).await?;
        Ok(name)
    }

    async fn recall(&self, query: &str) -> Result<Vec<MemoryEntry>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        let mut scored: Vec<(usize, MemoryEntry)> = Vec::new();
        for (name, text) in self.entries() {
            let haystack = format!("{}\n{}", name, text).to_lowercase();
            let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
            if score > 0 {
                let (_, body) = split_frontmatter(&text);
                scored.push((
                    score,
                    MemoryEntry {
                        name,
                        content: body.to_string(),
                    },
                ));
            }
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().map(|(_, e)| e).take(10).collect())
    }

    async fn bullets(&self, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .entries()
            .into_iter()
            .rev()
            .take(limit)
            .map(|(name, text)| {
                let (_, body) = split_frontmatter(&text);
                let first_line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                let line: String = first_line.chars().take(140).collect();
                format!("{}: {}", name, line)
            })
            .collect())
    }

    async fn entry_count(&self) -> Result<usize> {
        Ok(self.entries().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn thread_roundtrips_through_disk() {
        let tmp = tempdir().unwrap();
        let mem = MarkdownMemory::open(tmp.path()).unwrap();

        let mut thread = mem.load_thread("telegram", "alice").await.unwrap();
        assert!(thread.turns.is_empty());
        thread.turns.push(ChatTurn::user("hello"));
        thread.turns.push(ChatTurn::assistant("hi there"));
        mem.save_thread(&thread).await.unwrap();

        let loaded = mem.load_thread("telegram", "alice").await.unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].content, "hello");
        // Distinct user gets a distinct thread.
        assert!(mem.load_thread("telegram", "bob").await.unwrap().turns.is_empty());
    }

    #[test]
    fn trim_folds_oldest_turns_into_summary() {
        let mut thread = ConversationThread::new("c", "u");
        for i in 0..130 {
            thread.turns.push(ChatTurn::user(format!("message {}", i)));
        }
        trim_thread(&mut thread);
        assert_eq!(thread.turns.len(), THREAD_KEEP);
        assert_eq!(thread.turns[0].content, "message 70");
        assert!(thread.summary.contains("message 0"));
        assert!(thread.summary.chars().count() <= SUMMARY_MAX_CHARS);
    }

    #[test]
    fn trim_is_idempotent() {
        let mut thread = ConversationThread::new("c", "u");
        for i in 0..130 {
            thread.turns.push(ChatTurn::user(format!("message {}", i)));
        }
        trim_thread(&mut thread);
        let turns_after = thread.turns.len();
        let summary_after = thread.summary.clone();
        trim_thread(&mut thread);
        assert_eq!(thread.turns.len(), turns_after);
        assert_eq!(thread.summary, summary_after);
    }

    #[test]
    fn summary_stays_bounded() {
        let mut thread = ConversationThread::new("c", "u");
        thread.summary = "x".repeat(SUMMARY_MAX_CHARS);
        for i in 0..200 {
            thread
                .turns
                .push(ChatTurn::user(format!("{} {}", "long text".repeat(10), i)));
        }
        trim_thread(&mut thread);
        assert!(thread.summary.chars().count() <= SUMMARY_MAX_CHARS);
    }

    #[tokio::test]
    async fn remember_then_recall_finds_entry() {
        let tmp = tempdir().unwrap();
        let mem = MarkdownMemory::open(tmp.path()).unwrap();
        mem.remember("Server Access", "The staging box is reached via bastion-2.")
            .await
            .unwrap();
        mem.remember("Coffee order", "Flat white, oat milk.")
            .await
            .unwrap();

        let hits = mem.recall("staging bastion").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "server-access");
        assert!(hits[0].content.contains("bastion-2"));
        assert!(!hits[0].content.contains("---"), "frontmatter is stripped");

        assert!(mem.recall("kubernetes").await.unwrap().is_empty());
        assert_eq!(mem.entry_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bullets_give_name_and_first_line() {
        let tmp = tempdir().unwrap();
        let mem = MarkdownMemory::open(tmp.path()).unwrap();
        mem.remember("deploy window", "Fridays are frozen.").await.unwrap();
        let bullets = mem.bullets(5).await.unwrap();
        assert_eq!(bullets.len(), 1);
        assert!(bullets[0].starts_with("deploy-window:"));
        assert!(bullets[0].contains("Fridays are frozen."));
    }

    #[test]
    fn slug_sanitizes_weird_input() {
        assert_eq!(slug("Server Access!"), "server-access");
        assert_eq!(slug("  "), "entry");
        assert_eq!(slug("a/b\\c"), "a-b-c");
    }
}
