//! SchedulerConfig - 設定値
//!
//! 読み込み元は 3 つ:
//! - `Default`（コード内の既定値）
//! - JSON ドキュメント（`from_json`）
//! - 環境変数 `BOBBIN_*`（`from_env` / `merge_env`）
//!
//! 不正な値は黙って無視せず `ConfigError` にします（Fail-fast）。

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::RetryPolicy;

pub const ENV_PREFIX: &str = "BOBBIN_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of workers, i.e. how many tasks may run at once.
    pub pool_size: usize,
    /// Dispatcher polling period.
    pub tick_ms: u64,
    pub default_max_retries: u32,
    pub default_retry_delay_ms: u64,
    pub default_timeout_ms: Option<u64>,
    /// Maximum number of terminal records kept; `None` keeps everything.
    pub history_limit: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            tick_ms: 100,
            default_max_retries: 3,
            default_retry_delay_ms: 1_000,
            default_timeout_ms: None,
            history_limit: Some(1_000),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_millis(self.default_retry_delay_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(doc)?)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Overlay `BOBBIN_*` variables obtained through `lookup`.
    ///
    /// `BOBBIN_HISTORY_LIMIT` and `BOBBIN_DEFAULT_TIMEOUT_MS` accept `none`
    /// to clear the value.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((k, v)) = get("POOL_SIZE") {
            self.pool_size = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("TICK_MS") {
            self.tick_ms = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("DEFAULT_MAX_RETRIES") {
            self.default_max_retries = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("DEFAULT_RETRY_DELAY_MS") {
            self.default_retry_delay_ms = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("DEFAULT_TIMEOUT_MS") {
            self.default_timeout_ms = parse_optional(&k, &v)?;
        }
        if let Some((k, v)) = get("HISTORY_LIMIT") {
            self.history_limit = parse_optional(&k, &v)?;
        }
        if let Some((k, v)) = get("RETRY_MULTIPLIER") {
            self.retry.multiplier = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_optional(&k, &v)?;
        }
        if let Some((k, v)) = get("RETRY_JITTER_MS") {
            self.retry.jitter_ms = parse(&k, &v)?;
        }
        Ok(self)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_optional<T: FromStr>(key: &str, value: &str) -> Result<Option<T>, ConfigError> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse(key, value).map(Some)
}
