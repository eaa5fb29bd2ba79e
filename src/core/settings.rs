use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::security::confirm;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Low,
    Medium,
    High,
}

impl AutonomyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AutonomyLevel::Low => "low",
            AutonomyLevel::Medium => "medium",
            AutonomyLevel::High => "high",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "low" => Some(AutonomyLevel::Low),
            "medium" => Some(AutonomyLevel::Medium),
            "high" => Some(AutonomyLevel::High),
            _ => None,
        }
    }

    /// The instruction embedded into the system prompt.
    pub fn instruction(self) -> &'static str {
        match self {
            AutonomyLevel::Low => "Always ask for approval before using any tool.",
            AutonomyLevel::Medium => {
                "Use safe tools freely; ask for approval before destructive or outward-facing ones."
            }
            AutonomyLevel::High => {
                "Act autonomously. Only ask when an action would be irreversible and ambiguous."
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
}

impl EmailSettings {
    pub fn is_configured(&self) -> bool {
        !self.imap_host.is_empty() && !self.username.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Integrations {
    pub email: EmailSettings,
    pub github_token: String,
    pub mastodon_base_url: String,
    pub mastodon_token: String,
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub reddit_username: String,
    pub reddit_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    // Security switches.
    pub sandbox_enabled: bool,
    pub ssrf_protection: bool,
    pub injection_guard: bool,
    pub gateway_auth: bool,
    pub audit_enabled: bool,
    pub allow_localhost_urls: bool,

    // Limits.
    pub shell_timeout_secs: u64,
    pub max_tool_output_chars: usize,
    pub rate_limit_per_minute: u32,
    pub max_request_body_bytes: usize,
    pub max_tool_calls: usize,

    // Tool category permissions.
    pub allow_shell: bool,
    pub allow_file_ops: bool,
    pub allow_web: bool,
    pub allow_browser: bool,
    pub allow_schedule: bool,
    pub allow_email: bool,
    pub allow_social: bool,
    pub allow_system_control: bool,

    // Domain policy for outbound fetches. An empty allowlist means "any
    // public domain"; the blocklist always wins.
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,

    pub autonomy_level: AutonomyLevel,
    pub agent_name: String,
    pub heartbeat_interval_minutes: u64,

    pub integrations: Integrations,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            sandbox_enabled: true,
            ssrf_protection: true,
            injection_guard: true,
            gateway_auth: true,
            audit_enabled: true,
            allow_localhost_urls: false,
            shell_timeout_secs: 60,
            max_tool_output_chars: 20_000,
            rate_limit_per_minute: 60,
            max_request_body_bytes: 1_048_576,
            max_tool_calls: 20,
            allow_shell: true,
            allow_file_ops: true,
            allow_web: true,
            allow_browser: true,
            allow_schedule: true,
            allow_email: false,
            allow_social: false,
            allow_system_control: false,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            autonomy_level: AutonomyLevel::Medium,
            agent_name: "famulus".to_string(),
            heartbeat_interval_minutes: 30,
            integrations: Integrations::default(),
        }
    }
}

impl RuntimeSettings {
    /// Shell timeout with the hard 120 s ceiling applied.
    pub fn effective_shell_timeout_secs(&self) -> u64 {
        self.shell_timeout_secs.min(120)
    }

    /// Domain policy check for an already-validated URL host.
    pub fn domain_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let matches = |d: &String| {
            let d = d.to_ascii_lowercase();
            host == d || host.ends_with(&format!(".{}", d))
        };
        if self.blocked_domains.iter().any(matches) {
            return false;
        }
        self.allowed_domains.is_empty() || self.allowed_domains.iter().any(matches)
    }
}

/// Outcome of a settings patch: what was applied, and which keys still need
/// a confirmation token before they can be applied.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsUpdate {
    pub applied: Vec<String>,
    pub requires_confirmation: Vec<PendingConfirmation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingConfirmation {
    pub key: String,
    pub value: Value,
    pub reason: String,
}

pub struct SettingsStore {
    path: PathBuf,
    secret: String,
    inner: RwLock<RuntimeSettings>,
}

impl SettingsStore {
    /// Load `settings.json`, rewriting defaults when the file is missing or
    /// unparseable. An unwritable settings file is fatal.
    pub fn open(workspace: &std::path::Path, secret: String) -> Result<Self> {
        let path = workspace.join(SETTINGS_FILE);
        let settings = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<RuntimeSettings>(&text) {
                Ok(s) => s,
                Err(e) => {
                    warn!("settings.json unparseable ({}), rewriting defaults", e);
                    RuntimeSettings::default()
                }
            },
            Err(_) => RuntimeSettings::default(),
        };
        let store = Self {
            path,
            secret,
            inner: RwLock::new(settings),
        };
        store.persist()?;
        Ok(store)
    }

    pub fn get(&self) -> RuntimeSettings {
        self.inner.read().unwrap().clone()
    }

    /// Apply overrides computed from the environment at boot. These bypass
    /// the confirmation gate: the operator set them on the process itself.
    pub fn apply_env_overrides(&self, f: impl FnOnce(&mut RuntimeSettings)) -> Result<()> {
        {
            let mut guard = self.inner.write().unwrap();
            f(&mut guard);
        }
        self.persist()
    }

    /// Patch settings from a JSON object. Dangerous `(key, value)` pairs are
    /// applied only when `confirmations` carries a valid token for them;
    /// everything else in the patch is applied regardless, and the refused
    /// keys are reported back with their reasons.
    pub fn update(&self, patch: &Value, confirmations: &[String]) -> Result<SettingsUpdate> {
        let obj = patch
            .as_object()
            .context("settings patch must be a JSON object")?;

        let mut applied = Vec::new();
        let mut pending = Vec::new();

        let mut current = serde_json::to_value(self.get())?;
        for (key, value) in obj {
            if let Some(reason) = confirm::dangerous_reason(key, value) {
                let confirmed = confirmations
                    .iter()
                    .any(|t| confirm::verify_confirmation(&self.secret, key, value, t));
                if !confirmed {
                    pending.push(PendingConfirmation {
                        key: key.clone(),
                        value: value.clone(),
                        reason: reason.to_string(),
                    });
                    continue;
                }
            }
            deep_merge(&mut current[key.as_str()], value);
            applied.push(key.clone());
        }

        let next: RuntimeSettings = serde_json::from_value(current)
            .context("settings patch produced an invalid configuration")?;
        {
            let mut guard = self.inner.write().unwrap();
            *guard = next;
        }
        self.persist()?;

        if !applied.is_empty() {
            info!("settings updated: {}", applied.join(", "));
        }
        Ok(SettingsUpdate {
            applied,
            requires_confirmation: pending,
        })
    }

    /// Confirmation token the client must echo back to apply a dangerous pair.
    pub fn confirmation_token(&self, key: &str, value: &Value) -> String {
        confirm::confirmation_token(&self.secret, key, value)
    }

    fn persist(&self) -> Result<()> {
        let settings = self.inner.read().unwrap().clone();
        let data = serde_json::to_string_pretty(&settings)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data.as_bytes())
            .with_context(|| format!("cannot write settings {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot persist settings {:?}", self.path))?;
        Ok(())
    }
}

/// Recursive object merge; scalars and arrays replace wholesale.
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                deep_merge(t.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (t, p) => *t = p.clone(),
    }
}
