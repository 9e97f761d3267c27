//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding lead state, approval register, and reply cursor
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Retry policy for transient port failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch shortlisting rule
    #[serde(default)]
    pub shortlist: ShortlistConfig,

    /// Scheduler timing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Notification channel configurations
    #[serde(default)]
    pub notifications: HashMap<String, NotificationConfig>,

    /// Which channels receive approval requests
    #[serde(default)]
    pub notify: Vec<String>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".leadflow")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            retry: RetryConfig::default(),
            shortlist: ShortlistConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: HashMap::new(),
            notify: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try .leadflow/config.toml in current directory
            let local = PathBuf::from(".leadflow/config.toml");
            if local.exists() {
                return Some(local);
            }

            // Try ~/.leadflow/config.toml
            dirs::home_dir().map(|h| h.join(".leadflow/config.toml"))
        });

        match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            _ => Ok(Config::default()),
        }
    }

    /// Directory holding one YAML file per lead
    pub fn leads_dir(&self) -> PathBuf {
        self.state_dir.join("leads")
    }

    /// Path of the approval register
    pub fn approvals_path(&self) -> PathBuf {
        self.state_dir.join("approvals.yaml")
    }

    /// Path of the reply-poll cursor
    pub fn cursor_path(&self) -> PathBuf {
        self.state_dir.join("reply-cursor.yaml")
    }
}

/// Retry policy for transient port failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts before a transition moves the lead to failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles per recorded failure
    #[serde(default = "default_backoff_base", with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Upper bound on the backoff delay
    #[serde(default = "default_backoff_cap", with = "humantime_serde")]
    pub backoff_cap: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_cap() -> Duration {
    Duration::from_secs(300)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt, given how many have already failed
    pub fn backoff_after(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << exp);
        delay.min(self.backoff_cap)
    }
}

/// Batch shortlisting rule applied across all scored leads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistConfig {
    /// How many of the highest-scoring leads to promote per batch
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Leads scoring below this are never promoted
    #[serde(default)]
    pub min_score: f64,
}

fn default_top_k() -> usize {
    3
}

impl Default for ShortlistConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
        }
    }
}

/// Scheduler timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between re-evaluation ticks
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Interval between inbox polls for replies
    #[serde(default = "default_reply_poll_interval", with = "humantime_serde")]
    pub reply_poll_interval: Duration,

    /// How long a sent lead may wait for a reply before abandonment
    #[serde(default = "default_reply_abandon_after", with = "humantime_serde")]
    pub reply_abandon_after: Duration,

    /// Timeout applied to every individual port call
    #[serde(default = "default_port_timeout", with = "humantime_serde")]
    pub port_timeout: Duration,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_reply_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_reply_abandon_after() -> Duration {
    // 14 days
    Duration::from_secs(14 * 24 * 60 * 60)
}

fn default_port_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            reply_poll_interval: default_reply_poll_interval(),
            reply_abandon_after: default_reply_abandon_after(),
            port_timeout: default_port_timeout(),
        }
    }
}

/// Notification channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationConfig {
    /// Slack webhook notification
    Slack {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
    },
    /// Telegram bot notification
    Telegram { bot_token: String, chat_id: String },
    /// Just log (for testing/debugging)
    Log,
}

/// Initialize the .leadflow directory
pub fn init() -> Result<()> {
    let state_dir = PathBuf::from(".leadflow");

    if !state_dir.exists() {
        std::fs::create_dir_all(&state_dir)?;
    }

    let leads_dir = state_dir.join("leads");
    if !leads_dir.exists() {
        std::fs::create_dir_all(&leads_dir)?;
    }

    // Create default config if it doesn't exist
    let config_path = state_dir.join("config.toml");
    if !config_path.exists() {
        let default_config = Config::default();
        let config_str =
            toml::to_string_pretty(&default_config).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, config_str)?;
    }

    Ok(())
}

// Custom serde module for Duration using humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
