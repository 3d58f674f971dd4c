//! Run records and their durable store

mod run;
mod store;

pub use run::{
    branch_name, generate_run_id, validate_run_id, PhaseError, PhaseOutcome, PhaseResult,
    RunStatus, WorkflowRun, SCHEMA_VERSION,
};
pub use store::{RunLease, StateStore};
