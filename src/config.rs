//! Configuration management for workbench.
//!
//! Configuration can be set via environment variables:
//! - `WORKBENCH_PROVIDER` - Optional. `ollama` (default), `openai`, `gemini` or `openrouter`.
//! - `WORKBENCH_MODEL` - Optional. Model name; each provider has its own default.
//! - `OPENAI_API_KEY` / `GEMINI_API_KEY` / `OPENROUTER_API_KEY` - Key for the selected provider.
//! - `OLLAMA_URL` - Optional. Ollama endpoint. Defaults to `http://127.0.0.1:11434`.
//! - `WORKSPACE_PATH` - Optional. The workspace directory. Defaults to current directory.
//! - `MAX_ITERATIONS` - Optional. Maximum agent loop iterations. Defaults to `20`.
//! - `TOOL_OUTPUT_LIMIT` - Optional. Characters of tool output fed back to the model. Defaults to `15000`.
//! - `COMMAND_TIMEOUT_SECS` - Optional. `run_command` timeout. Defaults to `60`.
//! - `VOYAGE_API_KEY` - Optional. Enables the semantic index.
//! - `EMBED_MODEL` - Optional. Embedding model. Defaults to `voyage-code-2`.
//! - `EMBED_URL` - Optional. Embeddings endpoint. Defaults to the Voyage API.
//! - `INDEX_DB_PATH` - Optional. SQLite chunk store. Defaults to `<workspace>/.workbench/index.db`.
//! - `WATCH_ENABLED` - Optional. Re-index on file changes. Defaults to `true`.
//! - `VALIDATE_COMMAND` / `VALIDATE_MARKER` - Project validation command and the file that enables it.
//! - `TEST_COMMAND` / `TEST_MARKER` - Test command and the file that enables it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::{Provider, ProviderConfig};
use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Semantic index configuration.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Embedding API key; the index is disabled without one
    pub embed_api_key: Option<String>,

    /// Embedding model
    pub embed_model: String,

    /// Embeddings endpoint
    pub embed_url: String,

    /// SQLite database for persisted chunks (None = in-memory store)
    pub db_path: Option<PathBuf>,

    /// Whether to watch the workspace for changes
    pub watch: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embed_api_key: None,
            embed_model: "voyage-code-2".to_string(),
            embed_url: crate::index::VOYAGE_EMBEDDINGS_URL.to_string(),
            db_path: None,
            watch: true,
        }
    }
}

impl IndexConfig {
    /// Check if the semantic index is enabled (embedding key configured).
    pub fn is_enabled(&self) -> bool {
        self.embed_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

/// External project commands used by `validate_project` and `run_tests`.
#[derive(Debug, Clone)]
pub struct ProjectCommands {
    pub validate_command: String,
    /// File whose presence enables validation (relative to workspace)
    pub validate_marker: String,
    pub test_command: String,
    /// File whose presence enables tests (relative to workspace)
    pub test_marker: String,
}

impl Default for ProjectCommands {
    fn default() -> Self {
        Self {
            validate_command: "npx tsc --noEmit".to_string(),
            validate_marker: "tsconfig.json".to_string(),
            test_command: "npm test".to_string(),
            test_marker: "package.json".to_string(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model provider used by the agent loop
    pub provider: Provider,

    /// Credentials and model for `provider`
    pub provider_config: ProviderConfig,

    /// Workspace directory for file operations
    pub workspace_path: PathBuf,

    /// Maximum iterations for the agent loop
    pub max_iterations: usize,

    /// Characters of tool output appended to the conversation
    pub tool_output_limit: usize,

    /// Timeout for approved shell commands
    pub command_timeout: Duration,

    /// Semantic index configuration
    pub index: IndexConfig,

    /// Validation and test commands
    pub commands: ProjectCommands,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if the selected hosted provider has no key and
    /// `ConfigError::InvalidValue` for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider: Provider = std::env::var("WORKBENCH_PROVIDER")
            .unwrap_or_else(|_| "ollama".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("WORKBENCH_PROVIDER".to_string(), e))?;

        let key_var = match provider {
            Provider::Ollama => None,
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
        };
        let api_key = match key_var {
            Some(var) => Some(
                std::env::var(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))?,
            ),
            None => None,
        };
        let base_url = match provider {
            Provider::Ollama => std::env::var("OLLAMA_URL").ok(),
            _ => std::env::var("WORKBENCH_BASE_URL").ok(),
        };

        let provider_config = ProviderConfig {
            api_key,
            model: std::env::var("WORKBENCH_MODEL").ok(),
            base_url,
        };

        let workspace_path = std::env::var("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let max_iterations = parse_var("MAX_ITERATIONS", 20)?;
        let tool_output_limit = parse_var("TOOL_OUTPUT_LIMIT", 15_000)?;
        let command_timeout = Duration::from_secs(parse_var("COMMAND_TIMEOUT_SECS", 60)?);

        let index = IndexConfig {
            embed_api_key: std::env::var("VOYAGE_API_KEY").ok(),
            embed_model: std::env::var("EMBED_MODEL")
                .unwrap_or_else(|_| "voyage-code-2".to_string()),
            embed_url: std::env::var("EMBED_URL")
                .unwrap_or_else(|_| crate::index::VOYAGE_EMBEDDINGS_URL.to_string()),
            db_path: Some(
                std::env::var("INDEX_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| workspace_path.join(".workbench").join("index.db")),
            ),
            watch: env_var_bool("WATCH_ENABLED", true),
        };

        let defaults = ProjectCommands::default();
        let commands = ProjectCommands {
            validate_command: std::env::var("VALIDATE_COMMAND")
                .unwrap_or(defaults.validate_command),
            validate_marker: std::env::var("VALIDATE_MARKER").unwrap_or(defaults.validate_marker),
            test_command: std::env::var("TEST_COMMAND").unwrap_or(defaults.test_command),
            test_marker: std::env::var("TEST_MARKER").unwrap_or(defaults.test_marker),
        };

        Ok(Self {
            provider,
            provider_config,
            workspace_path,
            max_iterations,
            tool_output_limit,
            command_timeout,
            index,
            commands,
        })
    }

    /// Create a config with default values rooted at `workspace_path` (useful for testing).
    pub fn new(workspace_path: PathBuf) -> Self {
        Self {
            provider: Provider::default(),
            provider_config: ProviderConfig::default(),
            workspace_path,
            max_iterations: 20,
            tool_output_limit: 15_000,
            command_timeout: Duration::from_secs(60),
            index: IndexConfig {
                watch: false,
                ..IndexConfig::default()
            },
            commands: ProjectCommands::default(),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
