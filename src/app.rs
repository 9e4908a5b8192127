//! Application logic for the `nl2sql-guard` CLI.
//!
//! Wires configuration and command-line flags into the workflow
//! collaborators. Kept apart from `main` so it can be tested.

use std::{path::PathBuf, sync::Arc, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::{
    cli::{Dialect, Format, Provider},
    config::Config,
    dialect::SqlDialect,
    error::{AppResult, config_error},
    generator::{SqlGenerator, build_prompt},
    guardrail::GuardrailConfig,
    llm::{LlmClient, LlmProvider},
    output::{OutputFormat, OutputOptions, format_dry_run, format_workflow_result},
    schema::{DdlSchemaProvider, SchemaProvider},
    warehouse::SqliteWarehouse,
    workflow::{Orchestrator, TerminalOutcome, WorkflowState}
};

/// Exit code for runs that end with an error instead of a terminal state
pub const EXIT_FATAL: i32 = 3;

/// Parameters for the ask command
#[derive(Debug, Clone)]
pub struct AskParams {
    pub question:      String,
    pub database:      Option<PathBuf>,
    pub schema_path:   Option<PathBuf>,
    pub provider:      Option<Provider>,
    pub api_key:       Option<String>,
    pub model:         Option<String>,
    pub ollama_url:    String,
    pub dialect:       Dialect,
    pub max_repairs:   Option<u32>,
    pub run_id:        Option<String>,
    pub output_format: Format,
    pub verbose:       bool,
    pub dry_run:       bool,
    pub no_color:      bool
}

/// Rendered result of the ask command
#[derive(Debug, Clone)]
pub struct AskResult {
    pub exit_code: i32,
    pub output:    String,
    /// Terminal state; `None` for dry runs
    pub state:     Option<WorkflowState>
}

/// Convert CLI dialect to internal SqlDialect
pub fn convert_dialect(dialect: Dialect) -> SqlDialect {
    match dialect {
        Dialect::Generic => SqlDialect::Generic,
        Dialect::Sqlite => SqlDialect::SQLite,
        Dialect::Snowflake => SqlDialect::Snowflake,
        Dialect::Postgresql => SqlDialect::PostgreSQL,
        Dialect::Mysql => SqlDialect::MySQL
    }
}

/// Convert CLI format to internal OutputFormat
pub fn convert_format(format: Format) -> OutputFormat {
    match format {
        Format::Text => OutputFormat::Text,
        Format::Json => OutputFormat::Json,
        Format::Yaml => OutputFormat::Yaml
    }
}

/// Create output options from parameters
pub fn create_output_options(format: Format, no_color: bool, verbose: bool) -> OutputOptions {
    OutputOptions {
        format: convert_format(format),
        colored: !no_color,
        verbose
    }
}

/// Process exit code for a terminal outcome
pub fn exit_code_for(outcome: TerminalOutcome) -> i32 {
    match outcome {
        TerminalOutcome::Succeeded => 0,
        TerminalOutcome::Exhausted => 1,
        TerminalOutcome::Rejected => 2,
        TerminalOutcome::Pending => EXIT_FATAL
    }
}

/// Pick the provider from the flag, then config, falling back to OpenAI
pub fn resolve_provider(flag: Option<Provider>, config_name: Option<&str>) -> AppResult<Provider> {
    if let Some(provider) = flag {
        return Ok(provider);
    }
    match config_name {
        Some(name) => Provider::from_name(name)
            .ok_or_else(|| config_error(format!("Unknown LLM provider '{}'", name))),
        None => Ok(Provider::OpenAI)
    }
}

/// Build LLM provider from parameters
pub fn build_llm_provider(
    provider: Provider,
    api_key: Option<String>,
    model: String,
    ollama_url: String
) -> AppResult<LlmProvider> {
    match provider {
        Provider::OpenAI => {
            let key = api_key.ok_or_else(|| {
                config_error("API key required for OpenAI (use --api-key or LLM_API_KEY)")
            })?;
            Ok(LlmProvider::OpenAI {
                api_key: key,
                model
            })
        }
        Provider::Anthropic => {
            let key = api_key.ok_or_else(|| {
                config_error("API key required for Anthropic (use --api-key or LLM_API_KEY)")
            })?;
            Ok(LlmProvider::Anthropic {
                api_key: key,
                model
            })
        }
        Provider::Ollama => Ok(LlmProvider::Ollama {
            base_url: ollama_url,
            model
        })
    }
}

/// Get effective model name
pub fn get_effective_model(
    model: Option<String>,
    config_model: Option<String>,
    provider: &Provider
) -> String {
    model
        .or(config_model)
        .unwrap_or_else(|| provider.default_model().to_string())
}

/// Get effective Ollama URL
pub fn get_effective_ollama_url(url: String, config_url: Option<String>) -> String {
    if url == "http://localhost:11434" {
        config_url.unwrap_or(url)
    } else {
        url
    }
}

/// Choose where the schema comes from: a DDL file wins over the database
pub fn build_schema_provider(
    schema_path: Option<PathBuf>,
    database: Option<&PathBuf>,
    dialect: SqlDialect,
    guardrails: &GuardrailConfig
) -> AppResult<Arc<dyn SchemaProvider>> {
    if let Some(path) = schema_path {
        return Ok(Arc::new(
            DdlSchemaProvider::new(path, dialect).restricted_to(guardrails.clone())
        ));
    }
    let database = database.ok_or_else(|| {
        config_error("No schema source: pass --schema, --database or set WAREHOUSE_DATABASE")
    })?;
    Ok(Arc::new(
        SqliteWarehouse::open(database)?.restricted_to(guardrails.clone())
    ))
}

/// Run the ask command
pub async fn run_ask(params: AskParams, mut config: Config) -> AppResult<AskResult> {
    let dialect = convert_dialect(params.dialect);
    let output_opts = create_output_options(params.output_format, params.no_color, params.verbose);
    let guardrails = GuardrailConfig::from_config(&config.guardrails, dialect);
    let database = params.database.or(config.warehouse.database.take());
    if let Some(max_repairs) = params.max_repairs {
        config.workflow.max_repairs = max_repairs;
    }

    let schema_provider =
        build_schema_provider(params.schema_path, database.as_ref(), dialect, &guardrails)?;

    if params.dry_run {
        let snapshot = schema_provider.load_schema().await?;
        let summary = snapshot.to_summary();
        let prompt = build_prompt(&params.question, &snapshot, None);
        return Ok(AskResult {
            exit_code: 0,
            output:    format_dry_run(&summary, &prompt, &output_opts),
            state:     None
        });
    }

    let database = database.ok_or_else(|| {
        config_error("A warehouse is required to run queries (use --database or WAREHOUSE_DATABASE)")
    })?;
    let executor = Arc::new(
        SqliteWarehouse::open(&database)?.with_row_limit(config.warehouse.row_limit)
    );

    let provider = resolve_provider(params.provider, config.llm.provider.as_deref())?;
    let api_key = params.api_key.or(config.llm.api_key.clone());
    let ollama_url = get_effective_ollama_url(params.ollama_url, config.llm.ollama_url.clone());
    let model = get_effective_model(params.model, config.llm.model.clone(), &provider);
    debug!(provider = ?provider, model = %model, "using LLM");
    let llm_provider = build_llm_provider(provider, api_key, model, ollama_url)?;
    let client = LlmClient::with_retry_config(llm_provider, config.retry.clone());

    let orchestrator = Orchestrator::new(
        schema_provider,
        SqlGenerator::new(Arc::new(client)),
        executor,
        guardrails,
        config.workflow.clone()
    );

    let pb = if output_opts.format == OutputFormat::Text {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Generating and validating SQL...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let result = orchestrator.run(&params.question, params.run_id).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let state = result?;

    Ok(AskResult {
        exit_code: exit_code_for(state.terminal_outcome()),
        output:    format_workflow_result(&state, &output_opts),
        state:     Some(state)
    })
}
