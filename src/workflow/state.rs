use serde::Serialize;

use crate::{
    generator::RepairContext,
    guardrail::Verdict,
    schema::SchemaSnapshot,
    warehouse::QueryOutput
};

/// Verdict slot of the workflow state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    #[default]
    Unvalidated,
    Safe,
    Unsafe
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unvalidated => write!(f, "UNVALIDATED"),
            Self::Safe => write!(f, "SAFE"),
            Self::Unsafe => write!(f, "UNSAFE")
        }
    }
}

/// Final classification of a run, assigned exactly once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalOutcome {
    #[default]
    Pending,
    /// Query executed and rows are available
    Succeeded,
    /// Generation failed; not retried
    Rejected,
    /// Repair budget spent without a successful execution
    Exhausted
}

impl TerminalOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Exhausted => write!(f, "EXHAUSTED")
        }
    }
}

/// One generator call and what happened to its candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based generation attempt number
    pub attempt:           u32,
    /// `None` when generation failed
    pub sql:               Option<String>,
    pub verdict:           VerdictStatus,
    pub generation_error:  Option<String>,
    pub validation_reason: Option<String>,
    pub execution_error:   Option<String>,
    pub row_count:         Option<usize>
}

/// Record threaded through every step of one workflow run.
///
/// Fields are only changed through the transition methods below, which keep
/// the candidate, its verdict and its execution result in step. The
/// orchestrator is the single writer.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    run_id:              String,
    user_query:          String,
    #[serde(skip)]
    schema_snapshot:     Option<SchemaSnapshot>,
    candidate_sql:       Option<String>,
    validation_verdict:  VerdictStatus,
    validation_reason:   Option<String>,
    execution_result:    Option<QueryOutput>,
    execution_error:     Option<String>,
    generation_error:    Option<String>,
    repair_count:        u32,
    max_repairs:         u32,
    generation_attempts: u32,
    attempts:            Vec<AttemptRecord>,
    terminal_outcome:    TerminalOutcome
}

impl WorkflowState {
    pub fn new(run_id: impl Into<String>, user_query: impl Into<String>, max_repairs: u32) -> Self {
        Self {
            run_id: run_id.into(),
            user_query: user_query.into(),
            schema_snapshot: None,
            candidate_sql: None,
            validation_verdict: VerdictStatus::Unvalidated,
            validation_reason: None,
            execution_result: None,
            execution_error: None,
            generation_error: None,
            repair_count: 0,
            max_repairs,
            generation_attempts: 0,
            attempts: Vec::new(),
            terminal_outcome: TerminalOutcome::Pending
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn schema_snapshot(&self) -> Option<&SchemaSnapshot> {
        self.schema_snapshot.as_ref()
    }

    pub fn candidate_sql(&self) -> Option<&str> {
        self.candidate_sql.as_deref()
    }

    pub fn validation_verdict(&self) -> VerdictStatus {
        self.validation_verdict
    }

    pub fn validation_reason(&self) -> Option<&str> {
        self.validation_reason.as_deref()
    }

    pub fn execution_result(&self) -> Option<&QueryOutput> {
        self.execution_result.as_ref()
    }

    pub fn execution_error(&self) -> Option<&str> {
        self.execution_error.as_deref()
    }

    pub fn generation_error(&self) -> Option<&str> {
        self.generation_error.as_deref()
    }

    pub fn repair_count(&self) -> u32 {
        self.repair_count
    }

    pub fn max_repairs(&self) -> u32 {
        self.max_repairs
    }

    /// Number of generator invocations, including failed ones
    pub fn generation_attempts(&self) -> u32 {
        self.generation_attempts
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn terminal_outcome(&self) -> TerminalOutcome {
        self.terminal_outcome
    }

    /// Why the run did not succeed, if it did not
    pub fn failure_reason(&self) -> Option<&str> {
        match self.terminal_outcome {
            TerminalOutcome::Rejected => self.generation_error(),
            TerminalOutcome::Exhausted => self.validation_reason().or(self.execution_error()),
            TerminalOutcome::Pending | TerminalOutcome::Succeeded => None
        }
    }

    pub fn can_repair(&self) -> bool {
        self.repair_count < self.max_repairs
    }

    /// Repair context describing the current candidate's failure
    pub fn repair_context(&self) -> Option<RepairContext> {
        let previous_sql = self.candidate_sql.clone();
        if let Some(reason) = &self.validation_reason {
            return Some(RepairContext::validation(previous_sql, reason.clone()));
        }
        self.execution_error
            .as_ref()
            .map(|error| RepairContext::execution(previous_sql, error.clone()))
    }

    pub(crate) fn set_schema(&mut self, snapshot: SchemaSnapshot) {
        debug_assert!(self.schema_snapshot.is_none(), "schema is loaded once per run");
        self.schema_snapshot = Some(snapshot);
    }

    /// Install a fresh candidate; every per-candidate field is reset
    pub(crate) fn record_candidate(&mut self, sql: String) {
        self.generation_attempts += 1;
        self.validation_verdict = VerdictStatus::Unvalidated;
        self.validation_reason = None;
        self.execution_result = None;
        self.execution_error = None;
        self.attempts.push(AttemptRecord {
            attempt:           self.generation_attempts,
            sql:               Some(sql.clone()),
            verdict:           VerdictStatus::Unvalidated,
            generation_error:  None,
            validation_reason: None,
            execution_error:   None,
            row_count:         None
        });
        self.candidate_sql = Some(sql);
    }

    pub(crate) fn record_generation_failure(&mut self, reason: String) {
        self.generation_attempts += 1;
        self.attempts.push(AttemptRecord {
            attempt:           self.generation_attempts,
            sql:               None,
            verdict:           VerdictStatus::Unvalidated,
            generation_error:  Some(reason.clone()),
            validation_reason: None,
            execution_error:   None,
            row_count:         None
        });
        self.generation_error = Some(reason);
    }

    pub(crate) fn record_verdict(&mut self, verdict: &Verdict) {
        let (status, reason) = match verdict {
            Verdict::Safe => (VerdictStatus::Safe, None),
            Verdict::Unsafe(rejection) => (VerdictStatus::Unsafe, Some(rejection.reason.clone()))
        };
        self.validation_verdict = status;
        self.validation_reason = reason.clone();
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.verdict = status;
            attempt.validation_reason = reason;
        }
    }

    pub(crate) fn record_execution_success(&mut self, output: QueryOutput) {
        debug_assert_eq!(self.validation_verdict, VerdictStatus::Safe);
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.row_count = Some(output.row_count());
        }
        self.execution_error = None;
        self.execution_result = Some(output);
    }

    pub(crate) fn record_execution_failure(&mut self, error: String) {
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.execution_error = Some(error.clone());
        }
        self.execution_result = None;
        self.execution_error = Some(error);
    }

    pub(crate) fn begin_repair(&mut self) {
        debug_assert!(self.can_repair(), "repair budget exceeded");
        self.repair_count += 1;
    }

    pub(crate) fn finish(&mut self, outcome: TerminalOutcome) {
        debug_assert!(outcome.is_terminal(), "cannot finish as PENDING");
        debug_assert!(
            !self.terminal_outcome.is_terminal(),
            "terminal outcome is assigned once"
        );
        self.terminal_outcome = outcome;
    }
}
