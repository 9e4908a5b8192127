use std::{future::Future, sync::Arc, time::Duration};

use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::state::{TerminalOutcome, VerdictStatus, WorkflowState};
use crate::{
    config::WorkflowConfig,
    error::{AppError, AppResult, timeout_error},
    generator::{RepairContext, SqlGenerator},
    guardrail::{GuardrailConfig, validate},
    schema::{SchemaProvider, SchemaSnapshot},
    warehouse::QueryExecutor
};

/// Next step of a run
#[derive(Debug)]
enum Step {
    LoadSchema,
    Generate(Option<RepairContext>),
    Validate,
    Execute,
    Halt(TerminalOutcome)
}

/// Drives one question through schema load, generation, validation and
/// execution with a bounded repair loop.
///
/// The orchestrator holds no per-run state and can serve concurrent runs.
pub struct Orchestrator {
    schema_provider: Arc<dyn SchemaProvider>,
    generator:       SqlGenerator,
    executor:        Arc<dyn QueryExecutor>,
    guardrails:      GuardrailConfig,
    config:          WorkflowConfig
}

impl Orchestrator {
    pub fn new(
        schema_provider: Arc<dyn SchemaProvider>,
        generator: SqlGenerator,
        executor: Arc<dyn QueryExecutor>,
        guardrails: GuardrailConfig,
        config: WorkflowConfig
    ) -> Self {
        Self {
            schema_provider,
            generator,
            executor,
            guardrails,
            config
        }
    }

    pub fn guardrails(&self) -> &GuardrailConfig {
        &self.guardrails
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run the workflow to a terminal outcome.
    ///
    /// A fresh run id is generated when `run_id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the schema cannot be loaded. Generation,
    /// validation and execution failures end in a terminal state instead.
    pub async fn run(&self, user_query: &str, run_id: Option<String>) -> AppResult<WorkflowState> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!("workflow", run_id = %run_id);
        let state = WorkflowState::new(run_id, user_query, self.config.max_repairs);
        self.drive(state).instrument(span).await
    }

    async fn drive(&self, mut state: WorkflowState) -> AppResult<WorkflowState> {
        let mut step = Step::LoadSchema;
        loop {
            step = match step {
                Step::LoadSchema => {
                    debug!("loading schema");
                    let snapshot = self.schema_provider.load_schema().await?;
                    debug!(tables = snapshot.tables.len(), "schema loaded");
                    state.set_schema(snapshot);
                    Step::Generate(None)
                }
                Step::Generate(prior_error) => self.generate(&mut state, prior_error).await?,
                Step::Validate => self.validate(&mut state),
                Step::Execute => self.execute(&mut state).await?,
                Step::Halt(outcome) => {
                    state.finish(outcome);
                    match outcome {
                        TerminalOutcome::Succeeded => info!(
                            attempts = state.generation_attempts(),
                            repairs = state.repair_count(),
                            "workflow succeeded"
                        ),
                        _ => warn!(
                            outcome = %outcome,
                            reason = state.failure_reason().unwrap_or_default(),
                            "workflow did not succeed"
                        )
                    }
                    return Ok(state);
                }
            };
        }
    }

    async fn generate(
        &self,
        state: &mut WorkflowState,
        prior_error: Option<RepairContext>
    ) -> AppResult<Step> {
        let schema = loaded_schema(state)?;
        let timeout = self.config.generation_timeout();
        let result = bounded(
            "generation",
            timeout,
            self.generator
                .generate(state.user_query(), schema, prior_error.as_ref())
        )
        .await;
        Ok(match result {
            Ok(sql) => {
                debug!(sql = %sql, "candidate generated");
                state.record_candidate(sql);
                Step::Validate
            }
            Err(e) => {
                warn!(error = %e, "generation failed");
                state.record_generation_failure(e.to_string());
                Step::Halt(TerminalOutcome::Rejected)
            }
        })
    }

    fn validate(&self, state: &mut WorkflowState) -> Step {
        let verdict = validate(state.candidate_sql().unwrap_or_default(), &self.guardrails);
        state.record_verdict(&verdict);
        match verdict.rejection() {
            None => {
                debug!("candidate is safe");
                Step::Execute
            }
            Some(rejection) => {
                warn!(kind = %rejection.kind, reason = %rejection.reason, "candidate rejected");
                self.repair_or_exhaust(state)
            }
        }
    }

    async fn execute(&self, state: &mut WorkflowState) -> AppResult<Step> {
        if state.validation_verdict() != VerdictStatus::Safe {
            return Err(AppError::internal("refusing to execute a candidate that is not SAFE"));
        }
        let sql = state.candidate_sql().unwrap_or_default().to_string();
        let timeout = self.config.execution_timeout();
        Ok(
            match bounded("execution", timeout, self.executor.execute(&sql)).await {
                Ok(output) => {
                    debug!(rows = output.row_count(), "execution finished");
                    state.record_execution_success(output);
                    Step::Halt(TerminalOutcome::Succeeded)
                }
                Err(e) => {
                    warn!(error = %e, "execution failed");
                    state.record_execution_failure(e.to_string());
                    self.repair_or_exhaust(state)
                }
            }
        )
    }

    fn repair_or_exhaust(&self, state: &mut WorkflowState) -> Step {
        if !state.can_repair() {
            return Step::Halt(TerminalOutcome::Exhausted);
        }
        let context = state.repair_context();
        state.begin_repair();
        info!(
            repair = state.repair_count(),
            max_repairs = state.max_repairs(),
            "regenerating with error feedback"
        );
        Step::Generate(context)
    }
}

fn loaded_schema(state: &WorkflowState) -> AppResult<&SchemaSnapshot> {
    state
        .schema_snapshot()
        .ok_or_else(|| AppError::internal("schema snapshot missing after load"))
}

async fn bounded<T>(
    operation: &str,
    timeout: Duration,
    future: impl Future<Output = AppResult<T>>
) -> AppResult<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(operation, timeout.as_millis() as u64))
    }
}
