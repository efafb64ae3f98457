use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::models::DEFAULT_INTERVAL_MINUTES;
use crate::notify::Priority;

const APP_DIR: &str = "notice-watch";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_index_path")]
    pub index_path: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Used until an interval has been stored in the sync state.
    #[serde(default = "default_interval")]
    pub default_interval_minutes: u32,

    /// Only run scheduled syncs while the source host is reachable.
    #[serde(default = "default_require_network")]
    pub require_network: bool,

    /// Append notifications as JSON lines to this file instead of the log.
    pub notification_inbox: Option<String>,

    #[serde(default)]
    pub notification_priority: Priority,

    #[serde(default)]
    pub selectors: SelectorConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// CSS selectors describing the announcement pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub article: String,
    pub header: String,
    pub link_attribute: String,
    pub date: String,
    pub paragraph: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            article: "article".to_string(),
            header: "h2".to_string(),
            link_attribute: "about".to_string(),
            date: "span[property='dc:date dc:created']".to_string(),
            paragraph: "p".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 30,
            max_backoff_secs: 300,
        }
    }
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_base_url() -> String {
    "https://student.uit.edu.vn".to_string()
}

fn default_index_path() -> String {
    "/thong-bao-chung".to_string()
}

fn default_user_agent() -> String {
    format!("notice-watch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_require_network() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            base_url: default_base_url(),
            index_path: default_index_path(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            default_interval_minutes: default_interval(),
            require_network: default_require_network(),
            notification_inbox: None,
            notification_priority: Priority::default(),
            selectors: SelectorConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn index_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.index_path
        )
    }

    fn validate(&self) -> Result<()> {
        if self.default_interval_minutes == 0 {
            return Err(AppError::Config(
                "default_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| AppError::Config(format!("invalid base_url: {e}")))?;
        Ok(())
    }
}
