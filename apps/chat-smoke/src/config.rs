//! Environment-backed configuration for `chat-smoke`.

use std::{env, path::PathBuf};

use chat_core::SyncConfig;
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "./.duochat-store";
const DEFAULT_USER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Root directory holding one store directory per account.
    pub data_dir: PathBuf,
    /// Account whose store is inspected.
    pub user_id: String,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = SyncConfig::default();
        let data_dir = optional_trimmed_env("DUOCHAT_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let user_id = optional_trimmed_env("DUOCHAT_USER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_USER.to_owned());

        let page_size = parse_or("DUOCHAT_PAGE_SIZE", defaults.page_size, &mut lookup)?;
        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DUOCHAT_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        let top_threshold_px = parse_or(
            "DUOCHAT_TOP_THRESHOLD_PX",
            defaults.top_threshold_px,
            &mut lookup,
        )?;
        if !top_threshold_px.is_finite() || top_threshold_px < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "DUOCHAT_TOP_THRESHOLD_PX",
                value: top_threshold_px.to_string(),
                reason: "must be a non-negative number".to_owned(),
            });
        }

        let sync = SyncConfig {
            page_size,
            dedup_tolerance_ms: parse_or(
                "DUOCHAT_DEDUP_TOLERANCE_MS",
                defaults.dedup_tolerance_ms,
                &mut lookup,
            )?,
            top_threshold_px,
            fetch_timeout_ms: parse_or(
                "DUOCHAT_FETCH_TIMEOUT_MS",
                defaults.fetch_timeout_ms,
                &mut lookup,
            )?,
            utc_offset_minutes: parse_or(
                "DUOCHAT_UTC_OFFSET_MINUTES",
                defaults.utc_offset_minutes,
                &mut lookup,
            )?,
            ..defaults
        };

        Ok(Self {
            data_dir,
            user_id,
            sync,
        })
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}
