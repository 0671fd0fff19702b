//! Engine configuration.
//!
//! [`EngineConfig`] is read from a TOML or JSON file (chosen by extension)
//! and then overridden by `BLOCKROUTE_*` environment variables.  Every
//! field has a default, so an empty file or no file at all is valid.

use std::path::Path;
use std::str::FromStr;

use blockroute_core::{CompileOptions, InvalidTriggerPolicy, RegexMode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, Result};

/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "BLOCKROUTE_";

/// Runtime configuration of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// What a malformed trigger does to the flow being indexed.
    pub invalid_trigger_policy: InvalidTriggerPolicy,
    /// Anchor semantics for regex patterns that declare none.
    pub default_regex_mode: RegexMode,
    /// Compiled size limit for a single regex, in bytes.
    pub regex_size_limit: usize,
    /// Ask the classifier for intents when an event has text but none.
    pub classify_missing_intents: bool,
    /// Entries kept by the classifier cache; `0` disables caching.
    pub classifier_cache_capacity: u64,
    pub classifier_cache_ttl_secs: u64,
    /// Capacity of the engine event bus.
    pub event_bus_capacity: usize,
    /// Default tracing filter used by the binary when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invalid_trigger_policy: InvalidTriggerPolicy::RejectFlow,
            default_regex_mode: RegexMode::Search,
            regex_size_limit: 1 << 20,
            classify_missing_intents: true,
            classifier_cache_capacity: 1024,
            classifier_cache_ttl_secs: 300,
            event_bus_capacity: 256,
            log_level: "info".into(),
        }
    }
}

impl EngineConfig {
    /// Load from a file, then apply environment overrides.
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(path, &content)?
        } else {
            warn!(path = ?path, "configuration file does not exist, using defaults");
            Self::default()
        };
        config.apply_env(std::env::vars())?;
        info!(path = ?path, "configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Decode a configuration document; `.json` is JSON, anything else TOML.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(content).map_err(|e| EngineError::Config {
                reason: format!("failed to parse JSON config: {e}"),
            })
        } else {
            toml::from_str(content).map_err(|e| EngineError::Config {
                reason: format!("failed to parse TOML config: {e}"),
            })
        }
    }

    /// Apply `BLOCKROUTE_*` overrides from the given variables.
    ///
    /// Unknown `BLOCKROUTE_*` keys are ignored; malformed values are errors.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "INVALID_TRIGGER_POLICY" => {
                    self.invalid_trigger_policy = parse_enum(&key, &value)?;
                }
                "DEFAULT_REGEX_MODE" => self.default_regex_mode = parse_enum(&key, &value)?,
                "REGEX_SIZE_LIMIT" => self.regex_size_limit = parse_scalar(&key, &value)?,
                "CLASSIFY_MISSING_INTENTS" => {
                    self.classify_missing_intents = parse_scalar(&key, &value)?;
                }
                "CLASSIFIER_CACHE_CAPACITY" => {
                    self.classifier_cache_capacity = parse_scalar(&key, &value)?;
                }
                "CLASSIFIER_CACHE_TTL_SECS" => {
                    self.classifier_cache_ttl_secs = parse_scalar(&key, &value)?;
                }
                "EVENT_BUS_CAPACITY" => self.event_bus_capacity = parse_scalar(&key, &value)?,
                "LOG_LEVEL" => self.log_level = value,
                _ => {}
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_bus_capacity == 0 {
            return Err(EngineError::Config {
                reason: "event_bus_capacity must be greater than zero".into(),
            });
        }
        if self.regex_size_limit == 0 {
            return Err(EngineError::Config {
                reason: "regex_size_limit must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            default_regex_mode: self.default_regex_mode,
            regex_size_limit: self.regex_size_limit,
        }
    }
}

fn parse_scalar<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| EngineError::Config {
        reason: format!("{key}={value}: {e}"),
    })
}

/// Enum values use their serde (snake_case) spelling.
fn parse_enum<T: DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase())).map_err(|e| {
        EngineError::Config {
            reason: format!("{key}={value}: {e}"),
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
