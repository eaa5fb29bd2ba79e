use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const COSTS_FILE: &str = "costs.json";
const CONFIG_FILE: &str = "cost-config.json";
const HISTORY_DAYS: usize = 90;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub calls: u64,
}

/// One record per day per process. `call_count` always equals the sum of the
/// per-model call counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub call_count: u64,
    pub by_model: BTreeMap<String, ModelUsage>,
}

impl DailyUsage {
    fn empty(date: String) -> Self {
        Self {
            date,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            call_count: 0,
            by_model: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub daily_budget: f64,
    pub weekly_budget: f64,
    pub hard_stop: bool,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            daily_budget: 5.0,
            weekly_budget: 25.0,
            hard_stop: true,
        }
    }
}

struct CostState {
    days: Vec<DailyUsage>,
    config: CostConfig,
}

/// Process-wide LLM usage accumulator. Every call is recorded before the
/// caller observes the response, so the hard-stop check is monotonic.
pub struct CostTracker {
    costs_path: PathBuf,
    config_path: PathBuf,
    state: Mutex<CostState>,
}

impl CostTracker {
    pub fn open(workspace: &std::path::Path) -> Result<Self> {
        let costs_path = workspace.join(COSTS_FILE);
        let config_path = workspace.join(CONFIG_FILE);

        let days: Vec<DailyUsage> = match std::fs::read_to_string(&costs_path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("costs.json unparseable ({}), starting fresh", e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        let config: CostConfig = match std::fs::read_to_string(&config_path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => CostConfig::default(),
        };

        Ok(Self {
            costs_path,
            config_path,
            state: Mutex::new(CostState { days, config }),
        })
    }

    /// Record one LLM response. Synchronously persisted.
    pub fn track_usage(&self, model: &str, input_tokens: u64, output_tokens: u64, cost: f64) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut state = self.state.lock().unwrap();

        if state.days.last().map(|d| d.date != today).unwrap_or(true) {
            state.days.push(DailyUsage::empty(today));
            let overflow = state.days.len().saturating_sub(HISTORY_DAYS);
            if overflow > 0 {
                state.days.drain(..overflow);
            }
        }

        let day = state.days.last_mut().unwrap();
        day.input_tokens += input_tokens;
        day.output_tokens += output_tokens;
        day.cost += cost;
        day.call_count += 1;
        let per_model = day.by_model.entry(model.to_string()).or_default();
        per_model.input_tokens += input_tokens;
        per_model.output_tokens += output_tokens;
        per_model.cost += cost;
        per_model.calls += 1;

        if let Err(e) = persist_json(&self.costs_path, &state.days) {
            warn!("failed to persist costs: {}", e);
        }
    }

    /// False when the hard stop is armed and a budget window is exhausted.
    pub fn can_make_call(&self) -> bool {
        let state = self.state.lock().unwrap();
        if !state.config.hard_stop {
            return true;
        }
        if state.config.daily_budget > 0.0 && self.today_cost(&state) >= state.config.daily_budget {
            return false;
        }
        if state.config.weekly_budget > 0.0 && self.week_cost(&state) >= state.config.weekly_budget
        {
            return false;
        }
        true
    }

    pub fn today(&self) -> DailyUsage {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let state = self.state.lock().unwrap();
        state
            .days
            .iter()
            .find(|d| d.date == today)
            .cloned()
            .unwrap_or_else(|| DailyUsage::empty(today))
    }

    pub fn history(&self) -> Vec<DailyUsage> {
        self.state.lock().unwrap().days.clone()
    }

    pub fn config(&self) -> CostConfig {
        self.state.lock().unwrap().config.clone()
    }

    pub fn set_config(&self, config: CostConfig) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.config = config;
        persist_json(&self.config_path, &state.config)
    }

    fn today_cost(&self, state: &CostState) -> f64 {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        state
            .days
            .iter()
            .find(|d| d.date == today)
            .map(|d| d.cost)
            .unwrap_or(0.0)
    }

    fn week_cost(&self, state: &CostState) -> f64 {
        let cutoff = (Utc::now() - Duration::days(6)).format("%Y-%m-%d").to_string();
        state
            .days
            .iter()
            .filter(|d| d.date.as_str() >= cutoff.as_str())
            .map(|d| d.cost)
            .sum()
    }
}

fn persist_json<T: Serialize>(path: &std::path::Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data.as_bytes()).with_context(|| format!("write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename into {:?}", path))?;
    Ok(())
}
