//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//!
//! 1. Command-line arguments
//! 2. Environment variables (a `.env` file is honoured by the binary)
//! 3. `.nl2sql-guard.toml` in current directory
//! 4. `~/.config/nl2sql-guard/config.toml`
//! 5. Default values
//!
//! # Configuration File Format
//!
//! ```toml
//! [llm]
//! provider = "openai"          # openai, anthropic, ollama
//! model = "gpt-4o-mini"
//! api_key = "sk-..."           # or use LLM_API_KEY env var
//! ollama_url = "http://localhost:11434"
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! backoff_factor = 2.0
//!
//! [guardrails]
//! allowed_tables = ["PRODUCTS", "CUSTOMERS", "ORDERS", "ORDER_ITEMS"]
//!
//! [workflow]
//! max_repairs = 2
//! generation_timeout_ms = 120000
//! execution_timeout_ms = 30000
//!
//! [warehouse]
//! database = "retail.db"
//! row_limit = 200
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `LLM_API_KEY` | API key for OpenAI/Anthropic |
//! | `LLM_PROVIDER` | Provider name |
//! | `LLM_MODEL` | Model identifier |
//! | `OLLAMA_URL` | Ollama base URL |
//! | `WAREHOUSE_DATABASE` | Path to the SQLite warehouse |
//! | `NL2SQL_MAX_REPAIRS` | Repair budget per question |

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration
};

use serde::Deserialize;

use crate::{
    error::{AppResult, config_error},
    guardrail::DEFAULT_FORBIDDEN_KEYWORDS
};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm:        LlmConfig,
    #[serde(default)]
    pub retry:      RetryConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub workflow:   WorkflowConfig,
    #[serde(default)]
    pub warehouse:  WarehouseConfig
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider:   Option<String>,
    pub api_key:    Option<String>,
    pub model:      Option<String>,
    pub ollama_url: Option<String>
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider:   None,
            api_key:    None,
            model:      None,
            ollama_url: Some(String::from("http://localhost:11434"))
        }
    }
}

/// Retry configuration for LLM requests
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_retries:      u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms:     u64,
    pub backoff_factor:   f64
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries:      3,
            initial_delay_ms: 1000,
            max_delay_ms:     30000,
            backoff_factor:   2.0
        }
    }
}

/// Static guardrail configuration: table whitelist and forbidden operations
#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default = "default_allowed_tables")]
    pub allowed_tables:     Vec<String>,
    #[serde(default = "default_forbidden_keywords")]
    pub forbidden_keywords: Vec<String>
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            allowed_tables:     default_allowed_tables(),
            forbidden_keywords: default_forbidden_keywords()
        }
    }
}

fn default_allowed_tables() -> Vec<String> {
    ["PRODUCTS", "CUSTOMERS", "ORDERS", "ORDER_ITEMS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_forbidden_keywords() -> Vec<String> {
    DEFAULT_FORBIDDEN_KEYWORDS
        .iter()
        .map(|k| k.to_string())
        .collect()
}

/// Repair budget and timeouts for a single workflow run
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_repairs")]
    pub max_repairs:           u32,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms:  u64
}

impl WorkflowConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_repairs:           default_max_repairs(),
            generation_timeout_ms: default_generation_timeout_ms(),
            execution_timeout_ms:  default_execution_timeout_ms()
        }
    }
}

fn default_max_repairs() -> u32 {
    2
}

fn default_generation_timeout_ms() -> u64 {
    120_000
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

/// Warehouse connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    pub database:  Option<PathBuf>,
    #[serde(default = "default_row_limit")]
    pub row_limit: usize
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database:  None,
            row_limit: default_row_limit()
        }
    }
}

fn default_row_limit() -> usize {
    200
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file in current directory (.nl2sql-guard.toml)
    /// 3. Config file in home directory (~/.config/nl2sql-guard/config.toml)
    /// 4. Default values
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("nl2sql-guard")
                .join("config.toml");
            if home_config.exists() {
                config = Self::from_file(&home_config)?;
            }
        }

        let local_config = PathBuf::from(".nl2sql-guard.toml");
        if local_config.exists() {
            config = Self::from_file(&local_config)?;
        }

        config.apply_env()?;
        Ok(config)
    }

    /// Parse a single TOML config file
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| config_error(format!("Invalid config file: {}", e)))
    }

    fn apply_env(&mut self) -> AppResult<()> {
        if let Ok(api_key) = env::var("LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
        }
        if let Ok(provider) = env::var("LLM_PROVIDER") {
            self.llm.provider = Some(provider);
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Ok(url) = env::var("OLLAMA_URL") {
            self.llm.ollama_url = Some(url);
        }
        if let Ok(database) = env::var("WAREHOUSE_DATABASE") {
            self.warehouse.database = Some(PathBuf::from(database));
        }
        if let Ok(max_repairs) = env::var("NL2SQL_MAX_REPAIRS") {
            self.workflow.max_repairs = max_repairs.parse().map_err(|_| {
                config_error(format!(
                    "NL2SQL_MAX_REPAIRS must be a non-negative integer, got '{}'",
                    max_repairs
                ))
            })?;
        }
        Ok(())
    }
}
