//! Configuration layer: typed settings with layered precedence (files → env).

use std::{collections::HashMap, path::Path, str::FromStr};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "keylock";
const ENV_PREFIX: &str = "KEYLOCK";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence.
///
/// Sources, lowest to highest: `config/default.*`, `keylock.*` (both optional),
/// the explicit `config_file` (required when given), then `KEYLOCK__*`
/// environment variables such as `KEYLOCK__CACHE__REGION_CAPACITY`.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            cache: build_cache_settings(raw.cache)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    region_capacity: Option<u64>,
    region_limits: HashMap<String, u64>,
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let region_capacity = match cache.region_capacity {
        Some(value) => non_zero_usize(value, "cache.region_capacity")?,
        None => defaults.region_capacity,
    };

    let region_limits = cache
        .region_limits
        .into_iter()
        .map(|(region, limit)| {
            let limit = region_limit(&region, limit)?;
            Ok((region, limit))
        })
        .collect::<Result<HashMap<_, _>, LoadError>>()?;

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        region_capacity,
        region_limits,
    })
}

fn region_limit(region: &str, limit: u64) -> Result<usize, LoadError> {
    non_zero_usize(limit, "cache.region_limits").map_err(|err| match err {
        LoadError::Invalid { key, reason } => {
            LoadError::invalid(key, format!("region `{region}`: {reason}"))
        }
        other => other,
    })
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}
