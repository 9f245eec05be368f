use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::{AgentSettings, ElementStrategy};
use crate::brain::{DEFAULT_ENDPOINT, DEFAULT_MODEL, Dialect, GatewaySettings};
use crate::owner::{SessionSettings, default_profile_dir};
use crate::types::{PLAN_STEP_PAUSE, REACTIVE_STEP_PAUSE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Generate the whole plan up front, confirm, then execute it.
    Plan,
    /// Decide one step at a time from the current page.
    Reactive,
}

/// Drive a browser from natural-language goals.
#[derive(Debug, Clone, Parser)]
#[command(name = "agent", version, about)]
pub struct Config {
    #[arg(long, value_enum, env = "AGENT_MODE", default_value_t = Mode::Reactive)]
    pub mode: Mode,

    /// Chat or completion endpoint of an OpenAI-compatible provider.
    #[arg(long, env = "AGENT_MODEL_URL", default_value = DEFAULT_ENDPOINT)]
    pub model_url: String,

    #[arg(long, env = "AGENT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Sent as a bearer token when set.
    #[arg(long, env = "AGENT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, value_enum, env = "AGENT_DIALECT", default_value_t = Dialect::Chat)]
    pub dialect: Dialect,

    #[arg(long, env = "AGENT_TEMPERATURE", default_value_t = 0.0)]
    pub temperature: f32,

    #[arg(long, env = "AGENT_MAX_TOKENS", default_value_t = 1024)]
    pub max_tokens: u32,

    /// Attempts per model call when the provider rate-limits.
    #[arg(long, env = "AGENT_MAX_RETRIES", default_value_t = 4)]
    pub max_retries: u32,

    /// First wait after a rate-limited call; doubles on each retry.
    #[arg(long, env = "AGENT_BACKOFF_SECS", default_value_t = 5)]
    pub backoff_secs: u64,

    #[arg(long, env = "AGENT_REQUEST_TIMEOUT_SECS", default_value_t = 150)]
    pub request_timeout_secs: u64,

    /// Browser profile directory, kept between runs.
    #[arg(long, env = "AGENT_PROFILE_DIR")]
    pub profile_dir: Option<PathBuf>,

    #[arg(long, env = "AGENT_HEADLESS")]
    pub headless: bool,

    #[arg(long, env = "AGENT_CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Attach to a running Chrome through its DevTools websocket instead of launching one.
    #[arg(long, env = "AGENT_CHROME_WS")]
    pub connect: Option<String>,

    #[arg(long, env = "AGENT_NAVIGATION_TIMEOUT_SECS", default_value_t = 60)]
    pub navigation_timeout_secs: u64,

    #[arg(long, env = "AGENT_ELEMENT_TIMEOUT_SECS", default_value_t = 15)]
    pub element_timeout_secs: u64,

    #[arg(long, env = "AGENT_SNAPSHOT_DIR", default_value = "snapshots")]
    pub snapshot_dir: PathBuf,

    /// Seconds between periodic page snapshots; 0 turns them off.
    #[arg(long, env = "AGENT_SNAPSHOT_INTERVAL_SECS", default_value_t = 60)]
    pub snapshot_interval_secs: u64,

    /// Step ceiling for reactive mode.
    #[arg(long, env = "AGENT_MAX_STEPS", default_value_t = 50)]
    pub max_steps: usize,

    #[arg(long, env = "AGENT_HISTORY_LEN", default_value_t = 6)]
    pub history_len: usize,

    #[arg(long, env = "AGENT_CONFIDENCE_THRESHOLD", default_value_t = 0.7, value_parser = parse_confidence)]
    pub confidence_threshold: f64,

    #[arg(long, env = "AGENT_STRATEGY", value_enum, default_value_t = ElementStrategy::Selector)]
    pub strategy: ElementStrategy,
}

impl Config {
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            endpoint: self.model_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            dialect: self.dialect,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_retries: self.max_retries,
            initial_backoff: Duration::from_secs(self.backoff_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            profile_dir: self.profile_dir.clone().unwrap_or_else(default_profile_dir),
            headless: self.headless,
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            element_timeout: Duration::from_secs(self.element_timeout_secs),
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            max_steps: self.max_steps,
            history_capacity: self.history_len,
            confidence_threshold: self.confidence_threshold,
            plan_step_pause: PLAN_STEP_PAUSE,
            reactive_step_pause: REACTIVE_STEP_PAUSE,
            strategy: self.strategy,
        }
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        (self.snapshot_interval_secs > 0).then(|| Duration::from_secs(self.snapshot_interval_secs))
    }
}

fn parse_confidence(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not between 0 and 1"))
    }
}
