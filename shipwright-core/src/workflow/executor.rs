//! Phase execution
//!
//! [`PhaseExecutor::run_phase`] runs one pipeline phase for a run: it renders
//! the phase template from the run's state, invokes the agent in the run's
//! workspace, stores the structured result, appends a [`PhaseResult`] and
//! persists the run. The review phase delegates to the resolution loop.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::phase::Phase;
use super::resolution::{ResolutionLoop, ResolutionState};
use crate::agent::{AgentOutput, AgentRequest, AgentRuntime, PromptContext, TemplateName, TemplateSet};
use crate::config::WorkflowConfig;
use crate::git::WorkspaceManager;
use crate::state::{PhaseError, PhaseOutcome, PhaseResult, StateStore, WorkflowRun};
use crate::{Error, Result};

/// An agent result and where it was stored
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: AgentOutput,
    pub output_ref: String,
}

/// What a phase body produced, before it becomes a [`PhaseResult`]
struct PhaseOutput {
    output_ref: String,
    error: Option<PhaseError>,
}

impl PhaseOutput {
    fn succeeded(output_ref: String) -> Self {
        Self {
            output_ref,
            error: None,
        }
    }

    fn failed(output_ref: String, error: &Error) -> Self {
        Self {
            output_ref,
            error: Some(PhaseError::from_error(error)),
        }
    }
}

/// Runs single phases against the agent runtime
pub struct PhaseExecutor {
    runtime: Arc<dyn AgentRuntime>,
    templates: TemplateSet,
    store: StateStore,
    workspaces: WorkspaceManager,
    settings: WorkflowConfig,
}

impl std::fmt::Debug for PhaseExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseExecutor")
            .field("store", &self.store)
            .field("workspaces", &self.workspaces)
            .finish_non_exhaustive()
    }
}

impl PhaseExecutor {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        templates: TemplateSet,
        store: StateStore,
        workspaces: WorkspaceManager,
        settings: WorkflowConfig,
    ) -> Self {
        Self {
            runtime,
            templates,
            store,
            workspaces,
            settings,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run `phase`, which must be the run's next incomplete phase
    ///
    /// Agent and protocol failures come back as a recorded failure result.
    /// Template errors and state errors are returned as `Err` and leave the
    /// history untouched.
    pub async fn run_phase(&self, run: &mut WorkflowRun, phase: Phase) -> Result<PhaseResult> {
        if run.next_phase() != Some(phase) {
            return Err(Error::Consistency(format!(
                "run {} cannot run {} now (next phase: {})",
                run.run_id,
                phase,
                run.next_phase()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "none".to_string())
            )));
        }

        let attempt = attempt_number(run, phase);
        let scope = agent_name(phase, attempt);
        info!(run_id = %run.run_id, %phase, attempt, "Running phase");

        let started_at = Utc::now();
        let body = match phase {
            Phase::Review => self.review(run, &scope).await,
            _ => self.single(run, phase, &scope).await,
        };

        let mut result = match body {
            Ok(PhaseOutput {
                output_ref,
                error: None,
            }) => PhaseResult::success(phase, started_at, Some(output_ref)),
            Ok(PhaseOutput {
                output_ref,
                error: Some(error),
            }) => PhaseResult::failure(phase, started_at, Some(output_ref), error),
            Err(e) if e.kind().is_agent_failure() => {
                PhaseResult::failure(phase, started_at, None, PhaseError::from_error(&e))
            }
            Err(e) => return Err(e),
        };
        result.attempts = attempt;

        if result.outcome == PhaseOutcome::Failure {
            warn!(
                run_id = %run.run_id,
                %phase,
                attempt,
                error = %result.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "Phase failed"
            );
        } else {
            info!(run_id = %run.run_id, %phase, attempt, "Phase succeeded");
        }

        run.record_phase(result.clone())?;
        self.store.save(run)?;
        Ok(result)
    }

    /// Plan, build, test, document and ship: one agent invocation each
    async fn single(&self, run: &mut WorkflowRun, phase: Phase, scope: &str) -> Result<PhaseOutput> {
        let context = self.context(run);
        let Invocation { output, output_ref } = self
            .invoke(run, scope, TemplateName::for_phase(phase), &context)
            .await?;

        if !output.is_success() {
            let message = match phase {
                Phase::Test => format!("tests failed: {}", output.summary),
                _ => format!("{} agent reported failure: {}", phase, output.summary),
            };
            return Ok(PhaseOutput::failed(output_ref, &Error::Agent(message)));
        }

        match phase {
            Phase::Plan => {
                let Some(plan) = output.artifacts.first() else {
                    let err = Error::Protocol("plan result names no plan artifact".to_string());
                    return Ok(PhaseOutput::failed(output_ref, &err));
                };
                run.set_plan_ref(plan.clone())?;
            }
            Phase::Ship if self.settings.merge_on_ship => match self.workspaces.merge(run) {
                Ok(commit) => debug!(run_id = %run.run_id, commit = %commit, "Shipped by merge"),
                Err(e) => return Ok(PhaseOutput::failed(output_ref, &e)),
            },
            _ => {}
        }

        Ok(PhaseOutput::succeeded(output_ref))
    }

    /// Review plus the resolution loop; the stored output is the loop report
    async fn review(&self, run: &WorkflowRun, scope: &str) -> Result<PhaseOutput> {
        let resolution = ResolutionLoop::new(
            self,
            self.settings.max_resolution_iterations,
            run.options.skip_resolution,
        );
        let report = resolution.run(run, scope).await?;
        let output_ref = self.store.write_output(&run.run_id, scope, &report)?;

        match report.final_state {
            ResolutionState::Resolved => Ok(PhaseOutput::succeeded(output_ref)),
            _ => {
                let err = Error::Unresolved(report.describe_blocking());
                Ok(PhaseOutput::failed(output_ref, &err))
            }
        }
    }

    /// Render `template` and run it as agent `agent_name` in the run's workspace
    ///
    /// The result object is written to the run's outputs under `agent_name`.
    pub async fn invoke(
        &self,
        run: &WorkflowRun,
        agent_name: &str,
        template: TemplateName,
        context: &PromptContext,
    ) -> Result<Invocation> {
        let prompt = self.templates.render(template, context)?;

        let mut request = AgentRequest::new(agent_name, prompt, &run.workspace_path)
            .with_log_dir(self.store.agent_log_dir(&run.run_id, agent_name));
        if let Some(ports) = &run.ports {
            request = request
                .with_env("BACKEND_PORT", ports.primary_port.to_string())
                .with_env("FRONTEND_PORT", ports.secondary_port.to_string());
        }

        let output = self.runtime.invoke(&request).await?;
        let output_ref = self.store.write_output(&run.run_id, agent_name, &output)?;
        debug!(run_id = %run.run_id, agent = agent_name, output = %output_ref, "Stored agent result");
        Ok(Invocation { output, output_ref })
    }

    /// Template variables shared by every phase
    pub fn context(&self, run: &WorkflowRun) -> PromptContext {
        let (backend_port, frontend_port) = match &run.ports {
            Some(ports) => (ports.primary_port.to_string(), ports.secondary_port.to_string()),
            None => ("unassigned".to_string(), "unassigned".to_string()),
        };
        let body = if run.issue.body.trim().is_empty() {
            "(no description)".to_string()
        } else {
            run.issue.body.clone()
        };

        PromptContext::new()
            .with("RUN_ID", &run.run_id)
            .with("ISSUE_ID", &run.issue_ref.external_id)
            .with("ISSUE_TITLE", &run.issue.title)
            .with("ISSUE_BODY", body)
            .with("BRANCH_NAME", &run.branch_name)
            .with("WORKSPACE", run.workspace_path.display().to_string())
            .with(
                "PLAN_FILE",
                run.plan_ref.as_deref().unwrap_or("(not planned yet)"),
            )
            .with("BACKEND_PORT", backend_port)
            .with("FRONTEND_PORT", frontend_port)
            .with("PRIOR_OUTPUTS", self.prior_outputs(run))
            .with("SKIP_E2E", run.options.skip_e2e.to_string())
    }

    fn prior_outputs(&self, run: &WorkflowRun) -> String {
        let lines: Vec<String> = run
            .prior_outputs()
            .into_iter()
            .map(|(phase, output_ref)| {
                let summary = self
                    .store
                    .read_output(output_ref)
                    .ok()
                    .and_then(|v| v.get("summary").and_then(|s| s.as_str()).map(str::to_string))
                    .unwrap_or_default();
                if summary.is_empty() {
                    format!("- {}: `{}`", phase, output_ref)
                } else {
                    format!("- {}: {} (`{}`)", phase, summary, output_ref)
                }
            })
            .collect();

        if lines.is_empty() {
            "None yet.".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Attempt number the next execution of `phase` will be
fn attempt_number(run: &WorkflowRun, phase: Phase) -> u32 {
    run.phase_entry(phase)
        .filter(|r| r.outcome == PhaseOutcome::Failure)
        .map(|r| r.attempts + 1)
        .unwrap_or(1)
}

fn agent_name(phase: Phase, attempt: u32) -> String {
    if attempt <= 1 {
        phase.name().to_string()
    } else {
        format!("{}_attempt{}", phase.name(), attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ports::PortAllocation;
    use crate::testing::{sample_issue, Reply, ScriptedRuntime};
    use crate::workflow::PhaseOptions;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        runtime: Arc<ScriptedRuntime>,
        executor: PhaseExecutor,
        run: WorkflowRun,
    }

    fn fixture(runtime: ScriptedRuntime, templates: Option<&Path>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("runs"));
        let trees = dir.path().join("trees");
        let workspaces = WorkspaceManager::new(dir.path().join("repo"), &trees, None);
        let runtime = Arc::new(runtime);

        let executor = PhaseExecutor::new(
            runtime.clone(),
            TemplateSet::new(templates.map(Path::to_path_buf)),
            store,
            workspaces,
            WorkflowConfig::default(),
        );
        let mut run =
            WorkflowRun::new("r1", sample_issue("7"), &trees, PhaseOptions::default()).unwrap();
        run.ports = Some(PortAllocation {
            primary_port: 9107,
            secondary_port: 9207,
        });

        Fixture {
            _dir: dir,
            runtime,
            executor,
            run,
        }
    }

    #[tokio::test]
    async fn test_plan_sets_plan_ref_and_persists() {
        let mut f = fixture(
            ScriptedRuntime::new().reply(
                "plan",
                Reply::Output(AgentOutput::success("planned").with_artifact("specs/issue-7.md")),
            ),
            None,
        );

        let result = f.executor.run_phase(&mut f.run, Phase::Plan).await.unwrap();
        assert_eq!(result.outcome, PhaseOutcome::Success);
        assert_eq!(f.run.plan_ref.as_deref(), Some("specs/issue-7.md"));

        let saved = f.executor.store().load("r1").unwrap();
        assert_eq!(saved, f.run);

        let output = f
            .executor
            .store()
            .read_output(result.output_ref.as_deref().unwrap())
            .unwrap();
        assert_eq!(output["summary"], "planned");
    }

    #[tokio::test]
    async fn test_plan_without_artifact_is_protocol_failure() {
        let mut f = fixture(
            ScriptedRuntime::new().reply("plan", Reply::Output(AgentOutput::success("no file"))),
            None,
        );

        let result = f.executor.run_phase(&mut f.run, Phase::Plan).await.unwrap();
        assert_eq!(result.outcome, PhaseOutcome::Failure);
        assert_eq!(result.error.unwrap().kind, ErrorKind::Protocol);
        assert!(f.run.plan_ref.is_none());
    }

    #[tokio::test]
    async fn test_agent_timeout_becomes_failed_result() {
        let mut f = fixture(
            ScriptedRuntime::new()
                .reply("build", Reply::Agent("build timed out after 30m".to_string()))
                .reply("build", Reply::Agent("build timed out after 30m".to_string())),
            None,
        );
        f.run
            .record_phase(PhaseResult::success(Phase::Plan, Utc::now(), None))
            .unwrap();

        let first = f.executor.run_phase(&mut f.run, Phase::Build).await.unwrap();
        assert_eq!(first.outcome, PhaseOutcome::Failure);
        assert_eq!(first.attempts, 1);
        assert_eq!(first.error.as_ref().unwrap().kind, ErrorKind::Agent);

        let second = f.executor.run_phase(&mut f.run, Phase::Build).await.unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(f.run.phase_history.len(), 2);
        assert_eq!(f.runtime.agent_names(), vec!["build", "build_attempt2"]);
    }

    #[tokio::test]
    async fn test_failed_tests_fail_the_phase() {
        let mut f = fixture(
            ScriptedRuntime::new().reply(
                "test",
                Reply::Output(AgentOutput::failure("2 passed, 1 failed")),
            ),
            None,
        );
        for phase in [Phase::Plan, Phase::Build] {
            f.run
                .record_phase(PhaseResult::success(phase, Utc::now(), None))
                .unwrap();
        }

        let result = f.executor.run_phase(&mut f.run, Phase::Test).await.unwrap();
        assert_eq!(result.outcome, PhaseOutcome::Failure);
        let error = result.error.unwrap();
        assert!(error.message.contains("tests failed"));
        assert!(result.output_ref.is_some());
    }

    #[tokio::test]
    async fn test_template_error_is_fatal_and_unrecorded() {
        let templates = TempDir::new().unwrap();
        std::fs::write(templates.path().join("plan.md"), "Plan {{NOT_A_VARIABLE}}").unwrap();
        let mut f = fixture(ScriptedRuntime::new(), Some(templates.path()));

        let err = f
            .executor
            .run_phase(&mut f.run, Phase::Plan)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(f.run.phase_history.is_empty());
        assert!(f.runtime.agent_names().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_phase_is_rejected() {
        let mut f = fixture(ScriptedRuntime::new(), None);
        let err = f
            .executor
            .run_phase(&mut f.run, Phase::Ship)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[tokio::test]
    async fn test_request_carries_ports_and_log_dir() {
        let mut f = fixture(ScriptedRuntime::new(), None);
        f.executor.run_phase(&mut f.run, Phase::Plan).await.unwrap();

        let requests = f.runtime.requests();
        let request = &requests[0];
        assert!(request
            .env
            .contains(&("BACKEND_PORT".to_string(), "9107".to_string())));
        assert!(request
            .env
            .contains(&("FRONTEND_PORT".to_string(), "9207".to_string())));
        assert_eq!(
            request.log_dir.as_deref(),
            Some(f.executor.store().agent_log_dir("r1", "plan").as_path())
        );
        assert_eq!(request.workdir, f.run.workspace_path);
        assert!(request.prompt.contains("9107"));
    }

    #[tokio::test]
    async fn test_prior_outputs_reach_later_prompts() {
        let mut f = fixture(
            ScriptedRuntime::new().reply(
                "plan",
                Reply::Output(AgentOutput::success("wrote the plan").with_artifact("specs/p.md")),
            ),
            None,
        );
        f.executor.run_phase(&mut f.run, Phase::Plan).await.unwrap();
        f.executor.run_phase(&mut f.run, Phase::Build).await.unwrap();

        let requests = f.runtime.requests();
        assert!(requests[1].prompt.contains("wrote the plan"));
        assert!(requests[1].prompt.contains("specs/p.md"));
    }
}
