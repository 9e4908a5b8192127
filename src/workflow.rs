//! Guarded question-to-rows workflow.
//!
//! [`Orchestrator::run`] moves one [`WorkflowState`] through an explicit
//! state machine:
//!
//! ```text
//! LoadSchema -> Generate -> Validate -> Execute -> Succeeded
//!                  ^           |           |
//!                  +-- repair -+-----------+      (budget left)
//!                              |           |
//!                              +-> Exhausted <-+  (budget spent)
//!        Generate -- failure --> Rejected
//! ```
//!
//! Validation and execution failures are repairable: the failure reason is
//! fed back into the next prompt until `max_repairs` is reached. Generation
//! failures end the run as rejected. A schema that cannot be loaded aborts
//! the run with an error.

mod orchestrator;
mod state;

pub use orchestrator::Orchestrator;
pub use state::{AttemptRecord, TerminalOutcome, VerdictStatus, WorkflowState};
