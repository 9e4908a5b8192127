//! # NL2SQL Guard
//!
//! Answer natural-language questions against an analytics warehouse with
//! generated SQL that is validated before it ever runs.
//!
//! ```bash
//! export LLM_API_KEY="sk-..."
//! nl2sql-guard ask "Top 5 products by revenue" --database retail.db
//!
//! # Take the schema from DDL and only preview the prompt
//! nl2sql-guard ask "How many orders per customer?" --schema retail.sql --dry-run
//! ```
//!
//! # Exit Codes
//!
//! - `0` - Query executed, rows printed
//! - `1` - Repair budget exhausted without a valid, executable query
//! - `2` - Generation failed (model unreachable or no SQL in the reply)
//! - `3` - Fatal error (configuration, schema load)

use std::process;

use clap::Parser;
use nl2sql_guard::{
    app::{AskParams, EXIT_FATAL, run_ask},
    cli::{Cli, Commands},
    config::Config,
    error::AppResult,
    logging
};
use tokio::main;

#[main]
async fn main() {
    dotenvy::dotenv().ok();
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_FATAL);
        }
    }
}

async fn run() -> AppResult<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            question,
            database,
            schema,
            provider,
            api_key,
            model,
            ollama_url,
            dialect,
            max_repairs,
            run_id,
            output_format,
            verbose,
            dry_run,
            no_color
        } => {
            logging::init(verbose);
            let config = Config::load()?;
            let params = AskParams {
                question,
                database,
                schema_path: schema,
                provider,
                api_key,
                model,
                ollama_url,
                dialect,
                max_repairs,
                run_id,
                output_format,
                verbose,
                dry_run,
                no_color
            };
            let result = run_ask(params, config).await?;
            println!("{}", result.output);
            Ok(result.exit_code)
        }
    }
}
