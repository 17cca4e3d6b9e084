//! Process settings read once at the composition root.
//!
//! Nothing in the library reads the environment on its own: `Settings::from_env` is called by
//! the binary and the resulting values are threaded into `DeadlinePolicy`, `RetryPolicy` and
//! the provider explicitly. `Settings::from_lookup` takes any key lookup so tests never touch
//! the process environment.

use crate::classify::EmbeddedErrorPolicy;
use crate::deadline::DEFAULT_DEADLINE;
use crate::provider::openai::DEFAULT_API_BASE;
use std::time::Duration;

pub const ENV_THREAD_TIMEOUT: &str = "PROMPTLY_THREAD_TIMEOUT";
pub const ENV_DEADLINE_ATTEMPTS: &str = "PROMPTLY_DEADLINE_ATTEMPTS";
pub const ENV_MAX_ATTEMPTS: &str = "PROMPTLY_MAX_ATTEMPTS";
pub const ENV_MAX_ELAPSED: &str = "PROMPTLY_MAX_ELAPSED";
pub const ENV_RETRY_EMBEDDED_ERRORS: &str = "PROMPTLY_RETRY_EMBEDDED_ERRORS";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_API_BASE: &str = "OPENAI_API_BASE";
pub const ENV_BIND: &str = "PROMPTLY_BIND";

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// A setting that is present but unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: expected a positive number of seconds, got {value:?}")]
    InvalidSeconds { key: &'static str, value: String },
    #[error("{key}: expected a positive integer, got {value:?}")]
    InvalidCount { key: &'static str, value: String },
    #[error("{key}: expected a boolean, got {value:?}")]
    InvalidBool { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Per-attempt deadline of the executor.
    pub deadline: Duration,
    /// Cap on deadline-driven attempts; `None` re-issues forever.
    pub deadline_attempts: Option<usize>,
    /// Cap on backoff retries (total attempts); `None` retries forever.
    pub max_attempts: Option<usize>,
    /// Total time budget of the backoff loop.
    pub max_elapsed: Option<Duration>,
    pub embedded_errors: EmbeddedErrorPolicy,
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: String,
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            deadline_attempts: None,
            max_attempts: None,
            max_elapsed: None,
            embedded_errors: EmbeddedErrorPolicy::default(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let deadline = match get(ENV_THREAD_TIMEOUT) {
            Some(raw) => parse_seconds(ENV_THREAD_TIMEOUT, &raw)?,
            None => defaults.deadline,
        };
        let embedded_errors = match get(ENV_RETRY_EMBEDDED_ERRORS) {
            Some(raw) => match strtobool(&raw) {
                Some(true) => EmbeddedErrorPolicy::Retry,
                Some(false) => EmbeddedErrorPolicy::Fatal,
                None => {
                    return Err(ConfigError::InvalidBool { key: ENV_RETRY_EMBEDDED_ERRORS, value: raw })
                }
            },
            None => defaults.embedded_errors,
        };

        Ok(Self {
            deadline,
            deadline_attempts: get(ENV_DEADLINE_ATTEMPTS)
                .map(|raw| parse_count(ENV_DEADLINE_ATTEMPTS, &raw))
                .transpose()?,
            max_attempts: get(ENV_MAX_ATTEMPTS)
                .map(|raw| parse_count(ENV_MAX_ATTEMPTS, &raw))
                .transpose()?,
            max_elapsed: get(ENV_MAX_ELAPSED)
                .map(|raw| parse_seconds(ENV_MAX_ELAPSED, &raw))
                .transpose()?,
            embedded_errors,
            model: get(ENV_MODEL).unwrap_or(defaults.model),
            api_key: get(ENV_API_KEY),
            api_base: get(ENV_API_BASE).unwrap_or(defaults.api_base),
            bind: get(ENV_BIND).unwrap_or(defaults.bind),
        })
    }
}

/// Interpret the usual truthy and falsy spellings, case-insensitively.
pub fn strtobool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_seconds(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<f64>()
        .ok()
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ConfigError::InvalidSeconds { key, value: raw.to_string() })
}

fn parse_count(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidCount { key, value: raw.to_string() })
}
