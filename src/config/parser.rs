use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub forum: ForumConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForumConfig {
    /// Forum channel whose threads the engine owns.
    pub forum_id: i64,
    /// This bot's own user id, so self-authored messages and its own
    /// reactions stay out of the ledger.
    pub bot_user_id: i64,
    #[serde(default = "default_upvote_emoji")]
    pub upvote_emoji: String,
    #[serde(default = "default_downvote_emoji")]
    pub downvote_emoji: String,
    /// Threads whose name starts with this prefix are retired and
    /// exempt from numbering and reconciliation.
    #[serde(default = "default_retired_prefix")]
    pub retired_prefix: String,
    #[serde(default = "default_max_title_length")]
    pub max_title_length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_ban_sweep_interval_secs")]
    pub ban_sweep_interval_secs: u64,
    /// Hour of day (UTC) for the nightly reconciliation run.
    #[serde(default = "default_nightly_hour")]
    pub nightly_hour: u32,
    #[serde(default = "default_idle_archive_days")]
    pub idle_archive_days: i64,
    #[serde(default = "default_reconcile_on_startup")]
    pub reconcile_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ban_sweep_interval_secs: default_ban_sweep_interval_secs(),
            nightly_hour: default_nightly_hour(),
            idle_archive_days: default_idle_archive_days(),
            reconcile_on_startup: default_reconcile_on_startup(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Delay between reconciliation fetches, the pacer's resting rate.
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,
    /// Hard cap on the pacer's backoff under sustained throttling.
    #[serde(default = "default_throttle_cap_ms")]
    pub throttle_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            fetch_delay_ms: default_fetch_delay_ms(),
            throttle_cap_ms: default_throttle_cap_ms(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("DEBATE_ENGINE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_file(&config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database.path cannot be empty".to_string(),
            ));
        }

        if self.forum.forum_id <= 0 {
            return Err(ConfigError::InvalidConfig(
                "forum.forum_id must be a positive id".to_string(),
            ));
        }

        if self.forum.upvote_emoji == self.forum.downvote_emoji {
            return Err(ConfigError::InvalidConfig(
                "forum.upvote_emoji and forum.downvote_emoji must differ".to_string(),
            ));
        }

        if self.scheduler.nightly_hour > 23 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.nightly_hour must be between 0 and 23".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_db_path() -> String {
    "debate_engine.db".to_string()
}

fn default_upvote_emoji() -> String {
    "\u{2b06}\u{fe0f}".to_string()
}

fn default_downvote_emoji() -> String {
    "\u{2b07}\u{fe0f}".to_string()
}

fn default_retired_prefix() -> String {
    "[DEPRECATED]".to_string()
}

fn default_max_title_length() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_ban_sweep_interval_secs() -> u64 {
    60
}

fn default_nightly_hour() -> u32 {
    4
}

fn default_idle_archive_days() -> i64 {
    30
}

fn default_reconcile_on_startup() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_fetch_delay_ms() -> u64 {
    250
}

fn default_throttle_cap_ms() -> u64 {
    60_000
}
