use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use crate::{
    warehouse::{QueryOutput, Row},
    workflow::{AttemptRecord, TerminalOutcome, WorkflowState}
};

/// Output format for results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Output options
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:  OutputFormat,
    pub colored: bool,
    pub verbose: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:  OutputFormat::Text,
            colored: true,
            verbose: false
        }
    }
}

/// Terminal run record for serialization
#[derive(Debug, Serialize)]
pub struct WorkflowReport<'a> {
    pub run_id:         &'a str,
    pub question:       &'a str,
    pub outcome:        TerminalOutcome,
    pub sql:            Option<&'a str>,
    pub columns:        &'a [String],
    pub rows:           &'a [Row],
    pub truncated:      bool,
    pub failure_reason: Option<&'a str>,
    pub repair_count:   u32,
    pub attempts:       &'a [AttemptRecord]
}

impl<'a> WorkflowReport<'a> {
    pub fn from_state(state: &'a WorkflowState) -> Self {
        let result = state.execution_result();
        Self {
            run_id:         state.run_id(),
            question:       state.user_query(),
            outcome:        state.terminal_outcome(),
            sql:            state.candidate_sql(),
            columns:        result.map(|r| r.columns.as_slice()).unwrap_or_default(),
            rows:           result.map(|r| r.rows.as_slice()).unwrap_or_default(),
            truncated:      result.is_some_and(|r| r.truncated),
            failure_reason: state.failure_reason(),
            repair_count:   state.repair_count(),
            attempts:       state.attempts()
        }
    }
}

/// What a dry run would send to the model
#[derive(Debug, Serialize)]
pub struct DryRunReport<'a> {
    pub schema_summary: &'a str,
    pub prompt:         &'a str
}

/// Format the terminal state of a workflow run
pub fn format_workflow_result(state: &WorkflowState, opts: &OutputOptions) -> String {
    let report = WorkflowReport::from_state(state);
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(&report).unwrap_or_default(),
        OutputFormat::Text => format_text_result(state, &report, opts)
    }
}

/// Format the dry run preview
pub fn format_dry_run(schema_summary: &str, prompt: &str, opts: &OutputOptions) -> String {
    let report = DryRunReport {
        schema_summary,
        prompt
    };
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(&report).unwrap_or_default(),
        OutputFormat::Text => {
            let header = "=== DRY RUN - Would send to LLM ===";
            let header = if opts.colored {
                header.bold().to_string()
            } else {
                header.to_string()
            };
            format!(
                "{}\n\nSchema Summary:\n{}\n\nPrompt:\n{}",
                header, schema_summary, prompt
            )
        }
    }
}

fn format_text_result(
    state: &WorkflowState,
    report: &WorkflowReport<'_>,
    opts: &OutputOptions
) -> String {
    let mut output = String::new();
    if opts.colored {
        output.push_str(&"=== NL2SQL Result ===\n\n".bold().to_string());
    } else {
        output.push_str("=== NL2SQL Result ===\n\n");
    }

    output.push_str(&format!("Run:      {}\n", report.run_id));
    output.push_str(&format!("Outcome:  {}\n", outcome_label(report.outcome, opts.colored)));
    output.push_str(&format!(
        "Attempts: {} ({} repair{})\n",
        state.generation_attempts(),
        report.repair_count,
        if report.repair_count == 1 { "" } else { "s" }
    ));

    if let Some(sql) = report.sql {
        output.push_str("\nSQL:\n");
        for line in sql.lines() {
            output.push_str(&format!("  {}\n", line));
        }
    }

    if let Some(result) = state.execution_result() {
        let label = if result.truncated {
            format!("Rows ({}, truncated):", result.row_count())
        } else {
            format!("Rows ({}):", result.row_count())
        };
        output.push('\n');
        output.push_str(&label);
        output.push('\n');
        output.push_str(&render_table(result));
    }

    if let Some(reason) = report.failure_reason {
        let label = if opts.colored {
            "Reason:".red().bold().to_string()
        } else {
            "Reason:".to_string()
        };
        output.push_str(&format!("\n{} {}\n", label, reason));
    }

    if opts.verbose && !report.attempts.is_empty() {
        output.push_str("\nAttempts:\n");
        for attempt in report.attempts {
            output.push_str(&format!(
                "  #{} {}: {}\n",
                attempt.attempt,
                attempt.verdict,
                attempt
                    .sql
                    .as_deref()
                    .map_or_else(|| "(no SQL)".to_string(), |sql| sql.replace('\n', " "))
            ));
            if let Some(error) = &attempt.generation_error {
                output.push_str(&format!("     generation failed: {}\n", error));
            }
            if let Some(reason) = &attempt.validation_reason {
                output.push_str(&format!("     rejected: {}\n", reason));
            }
            if let Some(error) = &attempt.execution_error {
                output.push_str(&format!("     failed: {}\n", error));
            }
            if let Some(rows) = attempt.row_count {
                output.push_str(&format!("     rows: {}\n", rows));
            }
        }
    }

    output
}

fn outcome_label(outcome: TerminalOutcome, colored: bool) -> String {
    let label = outcome.to_string();
    if !colored {
        return label;
    }
    match outcome {
        TerminalOutcome::Succeeded => label.green().bold().to_string(),
        TerminalOutcome::Exhausted => label.yellow().bold().to_string(),
        TerminalOutcome::Rejected => label.red().bold().to_string(),
        TerminalOutcome::Pending => label
    }
}

/// Render rows as a plain aligned table
fn render_table(result: &QueryOutput) -> String {
    if result.columns.is_empty() {
        return String::new();
    }
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .map(|column| row.get(column).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or_default()
        })
        .collect();

    let mut table = String::new();
    table.push_str(&table_line(&result.columns, &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    table.push_str(&format!("  {}\n", rule.join("-+-")));
    for row in &cells {
        table.push_str(&table_line(row, &widths));
    }
    table
}

fn table_line(values: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", value, width = *width))
        .collect();
    format!("  {}\n", padded.join(" | ").trim_end())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string()
    }
}
