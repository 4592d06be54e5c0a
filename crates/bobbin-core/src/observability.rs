//! Observability - tracing subscriber の初期化
//!
//! ライブラリ本体は `tracing` のマクロでイベントを出すだけで、
//! subscriber の設置はバイナリ（またはテスト）側が `init_tracing` で行います。

use std::str::FromStr;

use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid log format: {0} (expected: text|json)")]
    InvalidFormat(String),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("logging has already been initialized")]
    AlreadyInitialized,
    #[error("failed to initialize logging: {0}")]
    InitializationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ObservabilityError::InvalidFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `bobbin_core=debug,warn`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: true,
        }
    }
}

impl LogConfig {
    /// Defaults overlaid with `BOBBIN_LOG_FORMAT` and `BOBBIN_LOG_LEVEL`
    /// (falling back to `RUST_LOG`).
    pub fn from_env() -> Result<Self, ObservabilityError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ObservabilityError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(format) = lookup("BOBBIN_LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Some(level) = lookup("BOBBIN_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            self.level = level;
        }
        Ok(self)
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(cfg: &LogConfig) -> Result<(), ObservabilityError> {
    let filter = mk_filter(&cfg.level)?;
    match cfg.format {
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_ansi(cfg.use_color)
                .with_target(cfg.with_targets);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(cfg.with_targets);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

fn mk_filter(level: &str) -> Result<EnvFilter, ObservabilityError> {
    EnvFilter::try_new(level).map_err(|_| ObservabilityError::InvalidLogLevel(level.to_string()))
}

fn init_with<S>(subscriber: S) -> Result<(), ObservabilityError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        let msg = e.to_string();
        if msg.contains("SetGlobalDefaultError") || msg.contains("global default") {
            ObservabilityError::AlreadyInitialized
        } else {
            ObservabilityError::InitializationFailed(msg)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(ObservabilityError::InvalidFormat(_))
        ));
    }

    #[test]
    fn env_overrides_and_rust_log_fallback() {
        let cfg = LogConfig::default()
            .merge_env(|key| match key {
                "BOBBIN_LOG_FORMAT" => Some("json".into()),
                "RUST_LOG" => Some("debug".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");
    }

    #[test]
    fn invalid_level_is_rejected() {
        let cfg = LogConfig {
            level: "bobbin_core=loud".into(),
            ..LogConfig::default()
        };
        assert!(matches!(
            init_tracing(&cfg),
            Err(ObservabilityError::InvalidLogLevel(_))
        ));
    }
}
