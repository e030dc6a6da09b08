//! Startup configuration.
//!
//! Built once from (lowest to highest precedence) defaults, an optional
//! TOML file, a `.env` file and the process environment, then shared
//! read-only.
//!
//! ```toml
//! [workspace]
//! root = "workspace"
//! read_only = ["inputs/**"]
//! clear_temp_on_exit = true
//!
//! [backend]
//! endpoint = "https://dashscope-intl.aliyuncs.com/compatible-mode/v1"
//! model = "qwen3-max"
//! timeout_ms = 120000
//!
//! [database]
//! endpoint = "https://api.materialsproject.org"
//!
//! [limits]
//! timeout_ms = 120000
//!
//! [agents]
//! max_tool_rounds = 12
//! max_delegations_per_turn = 4
//! ```
//!
//! Environment variables:
//!
//! | Variable                    | Field                              |
//! |-----------------------------|------------------------------------|
//! | `AGENTOM_WORKSPACE`         | `workspace.root`                   |
//! | `AGENTOM_MODEL`             | `backend.model`                    |
//! | `OPENAI_BASE_URL`           | `backend.endpoint`                 |
//! | `OPENAI_API_KEY`            | `backend.api_key`                  |
//! | `MP_API_KEY`                | `database.api_key`                 |
//! | `AGENTOM_MP_ENDPOINT`       | `database.endpoint`                |
//! | `AGENTOM_PYTHON`            | `python`                           |
//! | `AGENTOM_EXEC_TIMEOUT_MS`   | `limits.timeout_ms`                |
//! | `AGENTOM_MAX_TOOL_ROUNDS`   | `agents.max_tool_rounds`           |
//! | `AGENTOM_CLEAR_TEMP`        | `workspace.clear_temp_on_exit`     |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::DEFAULT_MAX_TOOL_ROUNDS;
use crate::backend::{DEFAULT_OPENAI_ENDPOINT, OpenAiBackend};
use crate::coordinator::DEFAULT_MAX_DELEGATIONS_PER_TURN;
use crate::database::{DEFAULT_MP_ENDPOINT, MaterialsProjectClient};
use crate::limits::{ExecLimits, duration_ms};
use crate::retry::RetryPolicy;
use crate::tools::{DEFAULT_PYTHON, ToolContext};
use crate::workspace::{Workspace, workspace_policy};

/// Errors building the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`Config`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A required credential is not set.
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
    /// A value is out of range or could not be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The credential itself.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Workspace settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace root directory
    pub root: PathBuf,
    /// Glob patterns tools may read but not write
    pub read_only: Vec<String>,
    /// Empty `tmp/` when the session ends
    pub clear_temp_on_exit: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspace"),
            read_only: Vec::new(),
            clear_temp_on_exit: true,
        }
    }
}

/// Inference backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// OpenAI-compatible base URL
    pub endpoint: String,
    /// Model used by the coordinator and every agent
    pub model: String,
    /// API key; usually taken from `OPENAI_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<Secret>,
    /// Per-request timeout
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            model: "qwen3-max".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
            temperature: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Materials database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Materials Project API base URL
    pub endpoint: String,
    /// API key; usually taken from `MP_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<Secret>,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_MP_ENDPOINT.to_string(),
            api_key: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounds on agent loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Tool rounds per delegated task
    pub max_tool_rounds: usize,
    /// Sequential delegations per user turn
    pub max_delegations_per_turn: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_delegations_per_turn: DEFAULT_MAX_DELEGATIONS_PER_TURN,
        }
    }
}

/// Everything needed to start a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace settings
    pub workspace: WorkspaceConfig,
    /// Inference backend settings
    pub backend: BackendConfig,
    /// Materials database settings
    pub database: DatabaseConfig,
    /// Code execution limits
    pub limits: ExecLimits,
    /// Agent loop bounds
    pub agents: AgentsConfig,
    /// Python interpreter for `run_python_script`
    pub python: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            backend: BackendConfig::default(),
            database: DatabaseConfig::default(),
            limits: ExecLimits::default(),
            agents: AgentsConfig::default(),
            python: DEFAULT_PYTHON.to_string(),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name}={value:?} is not a valid value")))
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Config {
    /// Load the configuration: `.env`, then `path` (if any), then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenv::dotenv() {
            tracing::debug!(path = %env_file.display(), "loaded .env");
        }
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply environment overrides, looking variables up with `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |name: &str| lookup(name).and_then(non_blank);

        if let Some(root) = get("AGENTOM_WORKSPACE") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(model) = get("AGENTOM_MODEL") {
            self.backend.model = model;
        }
        if let Some(endpoint) = get("OPENAI_BASE_URL") {
            self.backend.endpoint = endpoint;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.backend.api_key = Some(Secret(key));
        }
        if let Some(key) = get("MP_API_KEY") {
            self.database.api_key = Some(Secret(key));
        }
        if let Some(endpoint) = get("AGENTOM_MP_ENDPOINT") {
            self.database.endpoint = endpoint;
        }
        if let Some(python) = get("AGENTOM_PYTHON") {
            self.python = python;
        }
        if let Some(ms) = get("AGENTOM_EXEC_TIMEOUT_MS") {
            self.limits.timeout = Duration::from_millis(parse_env("AGENTOM_EXEC_TIMEOUT_MS", &ms)?);
        }
        if let Some(rounds) = get("AGENTOM_MAX_TOOL_ROUNDS") {
            self.agents.max_tool_rounds = parse_env("AGENTOM_MAX_TOOL_ROUNDS", &rounds)?;
        }
        if let Some(clear) = get("AGENTOM_CLEAR_TEMP") {
            self.workspace.clear_temp_on_exit = parse_env("AGENTOM_CLEAR_TEMP", &clear)?;
        }
        Ok(())
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid(
                "agents.max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.agents.max_delegations_per_turn == 0 {
            return Err(ConfigError::Invalid(
                "agents.max_delegations_per_turn must be at least 1".to_string(),
            ));
        }
        if self.limits.timeout.is_zero() {
            return Err(ConfigError::Invalid("limits.timeout_ms must be positive".to_string()));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.model must not be empty".to_string()));
        }
        if self.python.trim().is_empty() {
            return Err(ConfigError::Invalid("python must not be empty".to_string()));
        }
        Ok(())
    }

    /// The backend API key, or [`ConfigError::MissingCredential`].
    pub fn backend_api_key(&self) -> Result<&str, ConfigError> {
        self.backend
            .api_key
            .as_ref()
            .map(Secret::expose)
            .ok_or(ConfigError::MissingCredential("OPENAI_API_KEY"))
    }

    /// Open the workspace with the configured read-only patterns.
    pub fn open_workspace(&self) -> Result<Arc<Workspace>, ConfigError> {
        let workspace = Workspace::open(
            &self.workspace.root,
            workspace_policy(self.workspace.read_only.as_slice()),
        )
        .map_err(|e| ConfigError::Invalid(format!("workspace: {e}")))?;
        Ok(Arc::new(workspace))
    }

    /// Materials Project client. A missing key is not an error here; the
    /// database tools report it when called.
    pub fn materials_database(&self) -> Result<MaterialsProjectClient, ConfigError> {
        let key = self.database.api_key.as_ref().map(|k| k.expose().to_string());
        if key.is_none() {
            tracing::warn!("MP_API_KEY is not set; database tools will fail");
        }
        Ok(MaterialsProjectClient::new(key)
            .map_err(|e| ConfigError::Invalid(format!("database: {e}")))?
            .with_endpoint(&self.database.endpoint)
            .with_retry(self.database.retry.clone()))
    }

    /// Shared context for the tool registry.
    pub fn tool_context(&self) -> Result<ToolContext, ConfigError> {
        let workspace = self.open_workspace()?;
        let database = Arc::new(self.materials_database()?);
        Ok(ToolContext::new(workspace, database)
            .with_limits(self.limits.clone())
            .with_python(&self.python))
    }

    /// The inference backend. Requires `OPENAI_API_KEY`.
    pub fn inference_backend(&self) -> Result<OpenAiBackend, ConfigError> {
        let key = self.backend_api_key()?;
        let mut backend = OpenAiBackend::new(&self.backend.endpoint, key, self.backend.timeout)
            .map_err(|e| ConfigError::Invalid(format!("backend: {e}")))?
            .with_retry(self.backend.retry.clone());
        if let Some(temperature) = self.backend.temperature {
            backend = backend.with_temperature(temperature);
        }
        Ok(backend)
    }
}
