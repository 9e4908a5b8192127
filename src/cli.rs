use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// NL2SQL Guard - answer questions with guarded, read-only SQL
#[derive(Parser, Debug)]
#[command(name = "nl2sql-guard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate, validate and run SQL for a natural-language question
    Ask {
        /// Question to answer
        question: String,

        /// Path to the SQLite warehouse database
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// DDL file to take the schema from instead of the database catalog
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// LLM provider to use
        #[arg(short, long, value_enum)]
        provider: Option<Provider>,

        /// API key for OpenAI or Anthropic
        #[arg(short, long, env = "LLM_API_KEY")]
        api_key: Option<String>,

        /// Model name
        #[arg(short, long)]
        model: Option<String>,

        /// Ollama base URL
        #[arg(long, default_value = "http://localhost:11434")]
        ollama_url: String,

        /// SQL dialect used for validation and DDL parsing
        #[arg(long, value_enum, default_value = "sqlite")]
        dialect: Dialect,

        /// Maximum regenerate attempts after a failed candidate
        #[arg(long)]
        max_repairs: Option<u32>,

        /// Run identifier for logs and output (random if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        output_format: Format,

        /// Show per-attempt history and debug logs
        #[arg(short, long)]
        verbose: bool,

        /// Show the prompt that would be sent to the LLM without calling it
        #[arg(long)]
        dry_run: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Ollama
}

impl Provider {
    /// Get default model for provider
    pub fn default_model(&self) -> &str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Ollama => "llama3.2"
        }
    }

    /// Parse the provider name used in config files and `LLM_PROVIDER`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" | "open-ai" => Some(Self::OpenAI),
            "anthropic" => Some(Self::Anthropic),
            "ollama" => Some(Self::Ollama),
            _ => None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Dialect {
    Generic,
    Sqlite,
    Snowflake,
    Postgresql,
    Mysql
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}
