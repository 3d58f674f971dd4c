//! Workflow layer: the pipeline phases, the state machines that sequence
//! them, single-phase execution, the review resolution loop and the
//! orchestrator that owns a run end to end

mod executor;
pub mod machine;
mod orchestrator;
mod phase;
mod resolution;
pub mod transitions;

pub use executor::{Invocation, PhaseExecutor};
pub use machine::{StateMachine, Workflow};
pub use orchestrator::{AbortOutcome, Orchestrator};
pub use phase::{Phase, PhaseOptions};
pub use resolution::{
    Finding, PatchRecord, ResolutionLoop, ResolutionReport, ResolutionState, Severity,
};
pub use transitions::{Decision, OrchestratorState, RetryPolicy};
