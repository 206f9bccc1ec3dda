use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (bookdrip.toml + BOOKDRIP_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BookdripConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

/// Tunables for the background delivery runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How often the runner polls for due schedules, in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Maximum send attempts per message before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay, in seconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,
    /// Backoff delays are capped at this many seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: f64,
    /// Multiplier applied to the backoff after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Hard per-message length cap (Telegram allows 4096).
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_check_interval() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff() -> f64 {
    1.0
}
fn default_max_backoff() -> f64 {
    30.0
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_message_len() -> usize {
    4096
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bookdrip/bookdrip.db", home)
}

impl BookdripConfig {
    /// Load config from a TOML file with BOOKDRIP_* env var overrides.
    ///
    /// Falls back to `~/.bookdrip/bookdrip.toml` when no path is given.
    pub fn load(config_path: Option<&str>) -> crate::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: BookdripConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BOOKDRIP_").split("_"))
            .extract()
            .map_err(|e| crate::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bookdrip/bookdrip.toml", home)
}
