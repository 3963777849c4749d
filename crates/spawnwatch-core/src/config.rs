//! SpawnWatch configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SpawnWatchError};

/// One week.
const MAX_GRACE_MINUTES: i64 = 7 * 24 * 60;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnWatchConfig {
    /// JSON entity catalog seeded into the store at startup.
    #[serde(default)]
    pub catalog_path: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
}

impl SpawnWatchConfig {
    /// Load config from the default path (~/.spawnwatch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SpawnWatchError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SpawnWatchError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.tick_interval_secs == 0 {
            return Err(SpawnWatchError::Config(
                "scheduler.tick_interval_secs must be at least 1".into(),
            ));
        }
        if !(0..=MAX_GRACE_MINUTES).contains(&s.cleanup_grace_minutes) {
            return Err(SpawnWatchError::Config(format!(
                "scheduler.cleanup_grace_minutes must be between 0 and {MAX_GRACE_MINUTES}, got {}",
                s.cleanup_grace_minutes
            )));
        }
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SpawnWatchError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the SpawnWatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".spawnwatch")
    }

    /// Discord token, falling back to `DISCORD_TOKEN` when the file leaves it empty.
    pub fn discord_token(&self) -> Option<String> {
        if !self.discord.bot_token.is_empty() {
            return Some(self.discord.bot_token.clone());
        }
        std::env::var("DISCORD_TOKEN").ok().filter(|t| !t.is_empty())
    }
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.spawnwatch/spawnwatch.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    /// Path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Tick loop, cleanup and tenant-default settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Added to window end to get a ping's scheduled deletion time.
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_minutes: i64,
    /// How many recent channel messages the reconciler scans.
    #[serde(default = "default_scan_limit")]
    pub reconcile_scan_limit: usize,
    #[serde(default = "default_lookahead_hours")]
    pub default_lookahead_hours: i64,
    #[serde(default = "default_ping_minutes")]
    pub default_ping_minutes: i64,
    #[serde(default = "default_alert_minutes")]
    pub default_alert_minutes: i64,
}

fn default_tick_interval() -> u64 { 60 }
fn default_cleanup_grace() -> i64 { 60 }
fn default_scan_limit() -> usize { 50 }
fn default_lookahead_hours() -> i64 { 3 }
fn default_ping_minutes() -> i64 { 30 }
fn default_alert_minutes() -> i64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            cleanup_grace_minutes: default_cleanup_grace(),
            reconcile_scan_limit: default_scan_limit(),
            default_lookahead_hours: default_lookahead_hours(),
            default_ping_minutes: default_ping_minutes(),
            default_alert_minutes: default_alert_minutes(),
        }
    }
}

/// Discord REST transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String { "https://discord.com/api/v10".into() }
fn default_timeout() -> u64 { 10 }

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            timeout_secs: default_timeout(),
        }
    }
}
