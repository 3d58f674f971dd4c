//! Pipeline transition functions
//!
//! Pure functions over [`WorkflowRun`] snapshots: where a run stands, what to
//! do after a phase finishes, and the transition table of the pipeline
//! machine. The orchestrator owns the side effects.

use std::collections::BTreeMap;
use std::fmt;

use super::machine::StateMachine;
use super::phase::Phase;
use crate::config::WorkflowConfig;
use crate::error::ErrorKind;
use crate::state::{PhaseError, PhaseOutcome, PhaseResult, RunStatus, WorkflowRun};

/// States of the pipeline machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    Provisioning,
    Phase(Phase),
    Done,
    Aborted,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Provisioning => f.write_str("provisioning"),
            OrchestratorState::Phase(phase) => write!(f, "{}", phase),
            OrchestratorState::Done => f.write_str("done"),
            OrchestratorState::Aborted => f.write_str("aborted"),
        }
    }
}

/// provisioning -> plan -> build -> test -> review -> document -> ship -> done
///
/// A phase may repeat itself (retry). Provisioning may jump to any phase,
/// which is how a resumed run re-enters the pipeline. Every non-terminal
/// state may abort.
pub fn pipeline_machine() -> StateMachine<OrchestratorState> {
    use OrchestratorState::{Aborted, Done, Provisioning};
    let at = OrchestratorState::Phase;

    let mut transitions = vec![(Provisioning, Done), (Provisioning, Aborted)];
    for phase in Phase::ALL {
        transitions.push((Provisioning, at(phase)));
        transitions.push((at(phase), at(phase)));
        transitions.push((at(phase), Aborted));
        let next = match phase.next() {
            Some(next) => at(next),
            None => Done,
        };
        transitions.push((at(phase), next));
    }

    StateMachine::new("pipeline", Provisioning)
        .add_transitions(transitions)
        .terminal_states([Done, Aborted])
}

/// Where a run stands according to its record
pub fn next_state(run: &WorkflowRun) -> OrchestratorState {
    if run.status == RunStatus::Aborted {
        return OrchestratorState::Aborted;
    }
    match run.next_phase() {
        Some(phase) => OrchestratorState::Phase(phase),
        None => OrchestratorState::Done,
    }
}

/// The skipped entry for `phase`, when the run's options skip it
pub fn skipped_result(run: &WorkflowRun, phase: Phase) -> Option<PhaseResult> {
    run.options
        .should_skip(phase)
        .then(|| PhaseResult::skipped(phase))
}

/// Attempts allowed per phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: BTreeMap<Phase, u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            attempts: Phase::ALL
                .iter()
                .map(|p| (*p, config.max_attempts(*p)))
                .collect(),
        }
    }

    /// Same attempt limit for every phase
    pub fn uniform(attempts: u32) -> Self {
        Self {
            attempts: Phase::ALL.iter().map(|p| (*p, attempts.max(1))).collect(),
        }
    }

    pub fn max_attempts(&self, phase: Phase) -> u32 {
        self.attempts.get(&phase).copied().unwrap_or(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}

/// What the orchestrator does after a phase result has been recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Move on to the next phase (or finish)
    Advance,
    /// Run the same phase again
    Retry { attempt: u32 },
    /// Stop the run
    Abort(PhaseError),
}

/// Apply the retry policy to a phase result
///
/// Only agent and protocol failures are retried, and only while the phase
/// has attempts left. `carried` is the attempt count the phase already had
/// when the current drive began; the limit applies to attempts made since,
/// so a resumed run gets the same retries as a fresh one.
pub fn decide(result: &PhaseResult, policy: &RetryPolicy, carried: u32) -> Decision {
    match result.outcome {
        PhaseOutcome::Success | PhaseOutcome::Skipped => Decision::Advance,
        PhaseOutcome::Failure => {
            let error = result.error.clone().unwrap_or_else(|| PhaseError {
                kind: ErrorKind::Internal,
                message: format!("{} failed without an error", result.phase_name),
            });
            let used = result.attempts.saturating_sub(carried);
            if error.kind.is_agent_failure()
                && used < policy.max_attempts(result.phase_name)
            {
                Decision::Retry {
                    attempt: result.attempts + 1,
                }
            } else {
                Decision::Abort(error)
            }
        }
    }
}
