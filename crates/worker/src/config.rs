use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clipwatch_provider::polling::DEFAULT_MODEL;

/// Default provider endpoint.
pub const DEFAULT_API_URL: &str = "https://api.replicate.com/v1";

/// Default location of the job store file.
pub const DEFAULT_STORE_PATH: &str = "clipwatch-jobs.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Which provider backend the worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderMode {
    /// Create, then poll for status.
    #[default]
    Poll,
    /// Create and block until the job finishes.
    Blocking,
}

impl FromStr for ProviderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(Self::Poll),
            "blocking" | "block" => Ok(Self::Blocking),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => f.write_str("poll"),
            Self::Blocking => f.write_str("blocking"),
        }
    }
}

/// Provider and storage settings for the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub api_url: String,
    pub api_token: String,
    pub model: String,
    pub mode: ProviderMode,
    pub store_path: PathBuf,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var              | Required | Default                        |
    /// |----------------------|----------|--------------------------------|
    /// | `PROVIDER_API_URL`   | no       | `https://api.replicate.com/v1` |
    /// | `PROVIDER_API_TOKEN` | yes      | --                             |
    /// | `PROVIDER_MODEL`     | no       | `kwaivgi/kling-v1.6-standard`  |
    /// | `PROVIDER_MODE`      | no       | `poll` (`poll` or `blocking`)  |
    /// | `STORE_PATH`         | no       | `clipwatch-jobs.json`          |
    /// | `LOG_FORMAT`         | no       | text (`json` for JSON lines)   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_token = non_empty("PROVIDER_API_TOKEN")
            .ok_or(ConfigError::Missing("PROVIDER_API_TOKEN"))?;

        let mode = match non_empty("PROVIDER_MODE") {
            Some(raw) => raw.parse().map_err(|value| ConfigError::Invalid {
                key: "PROVIDER_MODE",
                value,
            })?,
            None => ProviderMode::default(),
        };

        Ok(Self {
            api_url: non_empty("PROVIDER_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            api_token,
            model: non_empty("PROVIDER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            mode,
            store_path: non_empty("STORE_PATH")
                .unwrap_or_else(|| DEFAULT_STORE_PATH.into())
                .into(),
            json_logs: non_empty("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}
