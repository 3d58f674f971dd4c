//! Workflow orchestrator
//!
//! Owns a run from claim to terminal status: provisions ports and a
//! workspace, drives the phases in order through the [`PhaseExecutor`],
//! applies the retry policy and decides when a run stops. It is the only
//! place that turns errors into run status.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::executor::PhaseExecutor;
use super::machine::Workflow;
use super::phase::{Phase, PhaseOptions};
use super::transitions::{decide, next_state, pipeline_machine, skipped_result, Decision, OrchestratorState, RetryPolicy};
use crate::agent::{AgentRuntime, TemplateSet};
use crate::config::{Config, WorkflowConfig};
use crate::git::{ConsistencyReport, WorkspaceManager};
use crate::ports::{PortAllocation, PortAllocator};
use crate::state::{
    generate_run_id, validate_run_id, PhaseError, PhaseOutcome, PhaseResult, RunStatus, StateStore,
    WorkflowRun,
};
use crate::tracker::{ensure_backend, IssueRef, IssueStatus, IssueTracker};
use crate::{Error, Result};

/// Result of a force-abort
#[derive(Debug)]
pub enum AbortOutcome {
    /// Nobody was driving the run; it is now aborted
    Aborted(WorkflowRun),
    /// Another orchestrator owns the run and will stop at the next phase boundary
    Requested,
}

/// Sequences phases for runs of one repository
pub struct Orchestrator {
    store: StateStore,
    tracker: Arc<dyn IssueTracker>,
    ports: PortAllocator,
    workspaces: WorkspaceManager,
    executor: PhaseExecutor,
    policy: RetryPolicy,
    settings: WorkflowConfig,
    trees_dir: PathBuf,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tracker", &self.tracker.kind())
            .field("store", &self.store)
            .field("trees_dir", &self.trees_dir)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        repo_root: &Path,
        tracker: Arc<dyn IssueTracker>,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Result<Self> {
        let store = StateStore::new(config.state_dir(repo_root));
        let trees_dir = config.trees_dir(repo_root);
        let workspaces = WorkspaceManager::new(
            repo_root,
            &trees_dir,
            config.workflow.base_branch.clone(),
        );
        let executor = PhaseExecutor::new(
            runtime,
            TemplateSet::new(config.paths.templates_dir.clone()),
            store.clone(),
            workspaces.clone(),
            config.workflow.clone(),
        );

        Ok(Self {
            ports: PortAllocator::from_config(config)?,
            policy: RetryPolicy::from_config(&config.workflow),
            settings: config.workflow.clone(),
            store,
            tracker,
            workspaces,
            executor,
            trees_dir,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn tracker(&self) -> &dyn IssueTracker {
        self.tracker.as_ref()
    }

    /// Claim an issue and run the whole pipeline for it
    ///
    /// Returns the run in its final state. A run stopped by the retry policy
    /// comes back `Ok` with status `aborted`; fatal errors are returned after
    /// the run has been marked `failed`.
    pub async fn start(
        &self,
        issue_ref: IssueRef,
        options: PhaseOptions,
        run_id: Option<String>,
    ) -> Result<WorkflowRun> {
        ensure_backend(self.tracker.kind(), &issue_ref)?;
        let run_id = run_id.unwrap_or_else(generate_run_id);
        validate_run_id(&run_id)?;
        if self.store.exists(&run_id) {
            return Err(Error::Config(format!(
                "run {} already exists; resume it instead",
                run_id
            )));
        }

        let _lease = self.store.acquire_lease(&run_id)?;
        let issue = self.tracker.fetch(&issue_ref).await?;
        let mut run = WorkflowRun::new(run_id, issue, &self.trees_dir, options)?;
        self.store.save(&run)?;
        info!(
            run_id = %run.run_id,
            issue = %run.issue_ref,
            branch = %run.branch_name,
            "Starting run"
        );

        if let Err(e) = self
            .tracker
            .update_status(&run.issue_ref, IssueStatus::InProgress)
            .await
        {
            error!(run_id = %run.run_id, error = %e, "Failed to claim issue");
            self.stop(&mut run, RunStatus::Failed, PhaseError::from_error(&e))?;
            return Err(e);
        }

        self.drive(&mut run, false, None).await?;
        Ok(run)
    }

    /// Continue a run at its first incomplete phase
    pub async fn resume(&self, run_id: &str) -> Result<WorkflowRun> {
        let mut run = self.load_resumable(run_id)?;
        let _lease = self.store.acquire_lease(run_id)?;
        self.store.clear_abort(run_id)?;

        info!(
            run_id,
            status = %run.status,
            next = %next_state(&run),
            "Resuming run"
        );
        self.drive(&mut run, true, None).await?;
        Ok(run)
    }

    /// Run (or retry) one phase of an existing run, then pause
    ///
    /// `phase` must be the run's next incomplete phase.
    pub async fn run_single_phase(&self, run_id: &str, phase: Phase) -> Result<WorkflowRun> {
        let mut run = self.load_resumable(run_id)?;
        if run.next_phase() != Some(phase) {
            return Err(Error::Config(format!(
                "run {} cannot run {}: next phase is {}",
                run_id,
                phase,
                next_state(&run)
            )));
        }

        let _lease = self.store.acquire_lease(run_id)?;
        self.store.clear_abort(run_id)?;
        self.drive(&mut run, true, Some(phase)).await?;
        Ok(run)
    }

    /// Force-abort a run
    ///
    /// Ports are released; the workspace and the issue claim are kept.
    pub fn abort(&self, run_id: &str, reason: &str) -> Result<AbortOutcome> {
        let mut run = self.store.load(run_id)?;
        if run.is_terminal() {
            return Err(Error::Config(format!(
                "run {} is already {}",
                run_id, run.status
            )));
        }

        match self.store.acquire_lease(run_id) {
            Ok(_lease) => {
                let err = Error::Aborted(reason.to_string());
                self.stop(&mut run, RunStatus::Aborted, PhaseError::from_error(&err))?;
                Ok(AbortOutcome::Aborted(run))
            }
            Err(Error::LeaseHeld(_)) => {
                self.store.request_abort(run_id)?;
                info!(run_id, "Run is owned by another orchestrator, abort requested");
                Ok(AbortOutcome::Requested)
            }
            Err(e) => Err(e),
        }
    }

    pub fn list_active(&self) -> Result<Vec<WorkflowRun>> {
        self.store.list_active()
    }

    /// A run and the current state of its workspace
    pub fn show(&self, run_id: &str) -> Result<(WorkflowRun, ConsistencyReport)> {
        let run = self.store.load(run_id)?;
        let report = self.workspaces.validate(&run)?;
        Ok((run, report))
    }

    /// Remove the workspace of a finished run
    pub fn reclaim(&self, run_id: &str) -> Result<WorkflowRun> {
        let run = self.store.load(run_id)?;
        if !run.is_terminal() {
            return Err(Error::Config(format!(
                "run {} is still {}; abort it before reclaiming",
                run_id, run.status
            )));
        }
        self.workspaces.reclaim(&run)?;
        self.ports.release(run_id)?;
        Ok(run)
    }

    fn load_resumable(&self, run_id: &str) -> Result<WorkflowRun> {
        let run = self.store.load(run_id)?;
        if run.status == RunStatus::Succeeded {
            return Err(Error::Config(format!("run {} already succeeded", run_id)));
        }
        ensure_backend(self.tracker.kind(), &run.issue_ref)?;
        Ok(run)
    }

    /// Provision, then run phases until the run finishes, stops, or (with
    /// `only`) moves past the requested phase
    async fn drive(&self, run: &mut WorkflowRun, resuming: bool, only: Option<Phase>) -> Result<()> {
        let mut machine = pipeline_machine();
        // Attempts a failed phase used before this drive; the retry limit
        // starts over from here
        let carried = run
            .phase_history
            .last()
            .filter(|r| r.outcome == PhaseOutcome::Failure)
            .map(|r| (r.phase_name, r.attempts));

        if let Err(e) = self.provision(run, resuming).await {
            error!(run_id = %run.run_id, error = %e, "Provisioning failed");
            machine.transition_to(OrchestratorState::Aborted)?;
            self.stop(run, RunStatus::Failed, PhaseError::from_error(&e))?;
            return Err(e);
        }

        loop {
            if self.store.abort_requested(&run.run_id) {
                let err = Error::Aborted("requested by operator".to_string());
                machine.transition_to(OrchestratorState::Aborted)?;
                self.stop(run, RunStatus::Aborted, PhaseError::from_error(&err))?;
                return Ok(());
            }

            let phase = match next_state(run) {
                OrchestratorState::Phase(phase) => phase,
                OrchestratorState::Done => {
                    machine.transition_to(OrchestratorState::Done)?;
                    return self.finish(run).await;
                }
                OrchestratorState::Provisioning | OrchestratorState::Aborted => {
                    return Err(Error::Consistency(format!(
                        "run {} has no phase to run",
                        run.run_id
                    )));
                }
            };
            if only.is_some_and(|only| only != phase) {
                info!(run_id = %run.run_id, next = %phase, "Requested phase complete, pausing run");
                return Ok(());
            }
            machine.transition_to(OrchestratorState::Phase(phase))?;

            let result = match skipped_result(run, phase) {
                Some(skipped) => {
                    run.record_phase(skipped.clone())?;
                    self.store.save(run)?;
                    info!(run_id = %run.run_id, %phase, "Phase skipped");
                    skipped
                }
                None => match self.executor.run_phase(run, phase).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(run_id = %run.run_id, %phase, error = %e, "Phase failed fatally");
                        let failed =
                            PhaseResult::failure(phase, Utc::now(), None, PhaseError::from_error(&e));
                        if let Err(record) = run.record_phase(failed) {
                            warn!(run_id = %run.run_id, error = %record, "Could not record failed phase");
                        }
                        machine.transition_to(OrchestratorState::Aborted)?;
                        self.stop(run, RunStatus::Failed, PhaseError::from_error(&e))?;
                        return Err(e);
                    }
                },
            };

            let carried_attempts = carried
                .filter(|(failed, _)| *failed == phase)
                .map_or(0, |(_, attempts)| attempts);
            match decide(&result, &self.policy, carried_attempts) {
                Decision::Advance => {}
                Decision::Retry { attempt } => {
                    info!(
                        run_id = %run.run_id,
                        %phase,
                        attempt,
                        max_attempts = self.policy.max_attempts(phase),
                        "Retrying phase"
                    );
                }
                Decision::Abort(error) => {
                    machine.transition_to(OrchestratorState::Aborted)?;
                    self.stop(run, RunStatus::Aborted, error)?;
                    return Ok(());
                }
            }
        }
    }

    /// Reserve ports and make sure the workspace matches the run record
    ///
    /// An inconsistent workspace gets one re-provision; if it still fails
    /// validation the error is fatal.
    async fn provision(&self, run: &mut WorkflowRun, resuming: bool) -> Result<()> {
        run.ports = Some(self.allocate_ports(&run.run_id).await?);

        if resuming {
            let report = self.workspaces.validate(run)?;
            if !report.is_consistent() {
                let issues: Vec<String> = report.issues.iter().map(|i| i.to_string()).collect();
                warn!(
                    run_id = %run.run_id,
                    issues = %issues.join("; "),
                    "Workspace inconsistent, re-provisioning"
                );
            }
        }

        self.workspaces.provision(run)?;
        self.workspaces.validate(run)?.into_result()?;

        run.status = RunStatus::Running;
        run.touch();
        self.store.save(run)
    }

    async fn allocate_ports(&self, run_id: &str) -> Result<PortAllocation> {
        let mut retries = 0;
        loop {
            match self.ports.allocate(run_id) {
                Ok(ports) => return Ok(ports),
                Err(e) if e.is_retryable() && retries < self.settings.resource_retries =>
                {
                    retries += 1;
                    let backoff = self.settings.resource_backoff * retries;
                    warn!(run_id, retries, ?backoff, error = %e, "Port allocation failed, backing off");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finish(&self, run: &mut WorkflowRun) -> Result<()> {
        run.status = RunStatus::Succeeded;
        run.touch();
        self.store.save(run)?;
        self.release_ports(run);
        self.store.clear_abort(&run.run_id)?;

        if self.settings.close_issue_on_success {
            let reason = format!(
                "Completed by shipwright run {} on branch {}",
                run.run_id, run.branch_name
            );
            if let Err(e) = self.tracker.close(&run.issue_ref, &reason).await {
                warn!(run_id = %run.run_id, issue = %run.issue_ref, error = %e, "Run succeeded but closing the issue failed");
            }
        }

        info!(run_id = %run.run_id, branch = %run.branch_name, "Run succeeded");
        Ok(())
    }

    /// Move a run to a terminal failure status
    ///
    /// The workspace and the issue claim are left for the operator.
    fn stop(&self, run: &mut WorkflowRun, status: RunStatus, error: PhaseError) -> Result<()> {
        warn!(
            run_id = %run.run_id,
            %status,
            error = %error,
            workspace = %run.workspace_path.display(),
            "Run stopped"
        );
        match status {
            RunStatus::Failed => run.mark_failed(error),
            _ => run.mark_aborted(error),
        }
        self.store.save(run)?;
        self.release_ports(run);
        self.store.clear_abort(&run.run_id)
    }

    fn release_ports(&self, run: &WorkflowRun) {
        if let Err(e) = self.ports.release(&run.run_id) {
            warn!(run_id = %run.run_id, error = %e, "Failed to release ports");
        }
    }
}
