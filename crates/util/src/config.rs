//! Runtime configuration: decision-service transport, snapshot location, navigation mode, limits.
//!
//! Resolution order is file, then environment, then whatever the caller layers on top
//! (the CLI applies its flags last).

use crate::path_processing::{app_config_dir, expand_tilde};
use crate::state_store::{STATE_PATH_ENV, default_state_path};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "READMES_CONFIG_PATH";
/// Environment variable overriding `decision.command`.
pub const LM_COMMAND_ENV: &str = "READMES_LM_COMMAND";
/// Environment variable overriding `decision.endpoint`.
pub const LM_ENDPOINT_ENV: &str = "READMES_LM_ENDPOINT";

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_ALTERNATIVE_DEPTH: usize = 3;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 8;
pub const DEFAULT_MAX_EVAL_STEPS: u64 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid decision endpoint '{value}': {source}")]
    InvalidEndpoint {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// How warmhole transitions pick their target by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NavigationPreference {
    /// Follow `next_warmhole` only.
    #[default]
    Static,
    /// Consult the decision service for every transition.
    Guided,
}

/// Where decision requests are sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DecisionConfig {
    /// Local LM command line; receives the prompt on stdin.
    pub command: Option<String>,
    /// HTTP endpoint receiving the request JSON. Used when no `command` is set.
    pub endpoint: Option<Url>,
    pub timeout_secs: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            command: None,
            endpoint: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl DecisionConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() || self.command.as_deref().is_some_and(|command| !command.trim().is_empty())
    }
}

/// Resource bounds for navigation and evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeLimits {
    /// Longest chain of decision-service alternatives followed by one navigation.
    pub max_alternative_depth: usize,
    /// Deepest reentrant `execute` nesting allowed inside template bodies.
    pub max_call_depth: usize,
    /// Evaluation steps a single template body may take.
    pub max_eval_steps: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_alternative_depth: DEFAULT_MAX_ALTERNATIVE_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_eval_steps: DEFAULT_MAX_EVAL_STEPS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub decision: DecisionConfig,
    pub state_path: Option<PathBuf>,
    pub navigation: NavigationPreference,
    pub limits: RuntimeLimits,
}

impl RuntimeConfig {
    /// Loads the config from the default path and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_path(None)
    }

    /// Loads the config from `path` (or the default path) and applies environment overrides.
    pub fn load_with_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_config_path(),
        };
        let mut config = Self::load_from_path(&path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Reads the config file; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `READMES_LM_COMMAND`, `READMES_LM_ENDPOINT`, and `READMES_STATE_PATH` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(command) = non_empty_var(LM_COMMAND_ENV) {
            self.decision.command = Some(command);
        }
        if let Some(endpoint) = non_empty_var(LM_ENDPOINT_ENV) {
            self.decision.endpoint = Some(parse_endpoint(&endpoint)?);
        }
        if let Some(state_path) = non_empty_var(STATE_PATH_ENV) {
            self.state_path = Some(expand_tilde(&state_path));
        }
        Ok(())
    }

    /// Snapshot path to use: the configured one, else the default.
    pub fn resolved_state_path(&self) -> PathBuf {
        match &self.state_path {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_state_path(),
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_error)
    }
}

/// Parses an endpoint URL, naming the offending value on failure.
pub fn parse_endpoint(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidEndpoint {
        value: value.to_string(),
        source,
    })
}

/// Config path from `READMES_CONFIG_PATH`, falling back to `<config_dir>/readmes/config.json`.
pub fn default_config_path() -> PathBuf {
    match non_empty_var(CONFIG_PATH_ENV) {
        Some(path) => expand_tilde(&path),
        None => app_config_dir().join(CONFIG_FILE_NAME),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = RuntimeConfig::load_from_path(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.decision.timeout_secs, 120);
        assert_eq!(config.limits.max_alternative_depth, 3);
        assert_eq!(config.limits.max_call_depth, 8);
        assert_eq!(config.limits.max_eval_steps, 100_000);
        assert_eq!(config.navigation, NavigationPreference::Static);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"navigation": "guided", "limits": {"max_call_depth": 2}}"#).unwrap();

        let config = RuntimeConfig::load_from_path(&path).unwrap();
        assert_eq!(config.navigation, NavigationPreference::Guided);
        assert_eq!(config.limits.max_call_depth, 2);
        assert_eq!(config.limits.max_alternative_depth, 3);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        let error = RuntimeConfig::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("config.json"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"decision": {"command": "file-lm"}}"#).unwrap();

        temp_env::with_vars(
            [
                (LM_COMMAND_ENV, Some("env-lm --json")),
                (LM_ENDPOINT_ENV, Some("http://localhost:8080/decide")),
                (STATE_PATH_ENV, Some("/tmp/readmes-state.json")),
            ],
            || {
                let config = RuntimeConfig::load_with_path(Some(&path)).unwrap();
                assert_eq!(config.decision.command.as_deref(), Some("env-lm --json"));
                assert_eq!(config.decision.endpoint.as_ref().map(Url::as_str), Some("http://localhost:8080/decide"));
                assert_eq!(config.resolved_state_path(), PathBuf::from("/tmp/readmes-state.json"));
                assert!(config.decision.is_configured());
            },
        );
    }

    #[test]
    fn invalid_endpoint_names_the_value() {
        temp_env::with_var(LM_ENDPOINT_ENV, Some("not a url"), || {
            let mut config = RuntimeConfig::default();
            let error = config.apply_env_overrides().unwrap_err();
            assert!(error.to_string().contains("not a url"));
        });
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = RuntimeConfig::default();
        config.decision.command = Some("lm".into());
        config.navigation = NavigationPreference::Guided;
        config.save_to_path(&path).unwrap();
        assert_eq!(RuntimeConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn default_path_honors_environment_override() {
        temp_env::with_var(CONFIG_PATH_ENV, Some("~/custom/readmes/config.json"), || {
            assert_eq!(default_config_path(), expand_tilde("~/custom/readmes/config.json"));
        });
    }
}
