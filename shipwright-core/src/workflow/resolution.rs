//! Review resolution loop
//!
//! Runs inside the review phase. A review produces findings; blocking ones
//! get a patch plan and a patch each, then the work is reviewed again. The
//! loop ends `resolved` when no blocking finding is left and `exhausted` when
//! the patch-cycle bound is reached (or resolution is skipped).

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::executor::{Invocation, PhaseExecutor};
use super::machine::{StateMachine, Workflow};
use crate::agent::{PromptContext, TemplateName};
use crate::state::WorkflowRun;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Reviewing,
    PatchPlanning,
    Patching,
    ReReviewing,
    Resolved,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "blocker")]
    Blocking,
    #[serde(alias = "skippable", alias = "tech_debt")]
    Advisory,
}

/// One problem reported by a review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub description: String,
    pub severity: Severity,
    /// Suggested fix
    #[serde(default)]
    pub resolution: String,
}

impl Finding {
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "finding id must be a string or number, got {}",
            other
        ))),
    }
}

/// A patch applied for one blocking finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub iteration: u32,
    pub finding_id: String,
    /// Patch plan the patch agent was given
    pub patch_plan: String,
    pub plan_ref: String,
    pub patch_ref: String,
}

/// Everything the loop did; stored as the review phase's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub final_state: ResolutionState,
    /// Patch cycles run
    pub iterations: u32,
    /// Findings of the last review
    pub findings: Vec<Finding>,
    /// Output references of each review, in order
    pub reviews: Vec<String>,
    pub patches: Vec<PatchRecord>,
    /// States visited
    pub transitions: Vec<ResolutionState>,
    pub summary: String,
}

impl ResolutionReport {
    pub fn blocking(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_blocking())
    }

    /// One line per remaining blocking finding
    pub fn describe_blocking(&self) -> String {
        let blocking: Vec<String> = self
            .blocking()
            .map(|f| format!("#{} {}", f.id, f.description))
            .collect();
        format!(
            "{} blocking finding(s) after {} patch cycle(s): {}",
            blocking.len(),
            self.iterations,
            blocking.join("; ")
        )
    }
}

fn resolution_machine() -> StateMachine<ResolutionState> {
    use ResolutionState::*;

    StateMachine::new("resolution", Reviewing)
        .add_transitions([
            (Reviewing, Resolved),
            (Reviewing, Exhausted),
            (Reviewing, PatchPlanning),
            (PatchPlanning, Patching),
            (Patching, ReReviewing),
            (ReReviewing, Resolved),
            (ReReviewing, Exhausted),
            (ReReviewing, PatchPlanning),
        ])
        .terminal_states([Resolved, Exhausted])
}

/// Bounded review and auto-fix loop for one review phase attempt
pub struct ResolutionLoop<'a> {
    executor: &'a PhaseExecutor,
    max_iterations: u32,
    skip_resolution: bool,
}

impl<'a> ResolutionLoop<'a> {
    pub fn new(executor: &'a PhaseExecutor, max_iterations: u32, skip_resolution: bool) -> Self {
        Self {
            executor,
            max_iterations,
            skip_resolution,
        }
    }

    /// Drive the loop to `resolved` or `exhausted`
    ///
    /// Agent names are prefixed with `scope`. A failing patch agent or a
    /// review that fails without findings is returned as an error.
    pub async fn run(&self, run: &WorkflowRun, scope: &str) -> Result<ResolutionReport> {
        let mut machine = resolution_machine();
        let mut reviews = Vec::new();
        let mut patches = Vec::new();
        let mut iterations = 0;

        let (mut findings, mut summary) = self.review(run, scope, 0, &mut reviews).await?;

        loop {
            let blocking: Vec<Finding> = findings.iter().filter(|f| f.is_blocking()).cloned().collect();
            if blocking.is_empty() {
                machine.transition_to(ResolutionState::Resolved)?;
                break;
            }
            if self.skip_resolution {
                info!(run_id = %run.run_id, blocking = blocking.len(), "Resolution skipped, reporting findings");
                machine.transition_to(ResolutionState::Exhausted)?;
                break;
            }
            if iterations >= self.max_iterations {
                warn!(
                    run_id = %run.run_id,
                    blocking = blocking.len(),
                    iterations,
                    "Blocking findings remain after the last patch cycle"
                );
                machine.transition_to(ResolutionState::Exhausted)?;
                break;
            }

            iterations += 1;
            info!(run_id = %run.run_id, iteration = iterations, blocking = blocking.len(), "Patching blocking findings");

            machine.transition_to(ResolutionState::PatchPlanning)?;
            let mut plans = Vec::with_capacity(blocking.len());
            for (index, finding) in blocking.iter().enumerate() {
                let agent = format!("{}_plan_fix{}_{}", scope, iterations, index + 1);
                let context = self.finding_context(run, finding);
                let Invocation { output, output_ref } = self
                    .executor
                    .invoke(run, &agent, TemplateName::PatchPlan, &context)
                    .await?;
                if !output.is_success() {
                    return Err(Error::Agent(format!(
                        "patch plan for finding {} failed: {}",
                        finding.id, output.summary
                    )));
                }
                let plan = output
                    .artifacts
                    .first()
                    .cloned()
                    .unwrap_or_else(|| output.summary.clone());
                plans.push((finding, plan, output_ref));
            }

            machine.transition_to(ResolutionState::Patching)?;
            for (index, (finding, plan, plan_ref)) in plans.into_iter().enumerate() {
                let agent = format!("{}_fix{}_{}", scope, iterations, index + 1);
                let context = self.finding_context(run, finding).with("PATCH_PLAN", &plan);
                let Invocation { output, output_ref } = self
                    .executor
                    .invoke(run, &agent, TemplateName::Patch, &context)
                    .await?;
                if !output.is_success() {
                    return Err(Error::Agent(format!(
                        "patch for finding {} failed: {}",
                        finding.id, output.summary
                    )));
                }
                patches.push(PatchRecord {
                    iteration: iterations,
                    finding_id: finding.id.clone(),
                    patch_plan: plan,
                    plan_ref,
                    patch_ref: output_ref,
                });
            }

            machine.transition_to(ResolutionState::ReReviewing)?;
            (findings, summary) = self.review(run, scope, iterations, &mut reviews).await?;
        }

        Ok(ResolutionReport {
            final_state: *machine.current(),
            iterations,
            findings,
            reviews,
            patches,
            transitions: machine.trace().to_vec(),
            summary,
        })
    }

    async fn review(
        &self,
        run: &WorkflowRun,
        scope: &str,
        round: u32,
        reviews: &mut Vec<String>,
    ) -> Result<(Vec<Finding>, String)> {
        let agent = format!("{}_round{}", scope, round);
        let context = self.executor.context(run);
        let Invocation { output, output_ref } = self
            .executor
            .invoke(run, &agent, TemplateName::Review, &context)
            .await?;
        reviews.push(output_ref);

        let findings: Vec<Finding> = output.payload_field("findings")?.unwrap_or_default();
        if !output.is_success() && !findings.iter().any(Finding::is_blocking) {
            return Err(Error::Agent(format!(
                "review agent reported failure: {}",
                output.summary
            )));
        }
        info!(
            run_id = %run.run_id,
            round,
            findings = findings.len(),
            blocking = findings.iter().filter(|f| f.is_blocking()).count(),
            "Review finished"
        );
        Ok((findings, output.summary))
    }

    fn finding_context(&self, run: &WorkflowRun, finding: &Finding) -> PromptContext {
        let resolution = if finding.resolution.trim().is_empty() {
            "(none given)"
        } else {
            finding.resolution.as_str()
        };
        self.executor
            .context(run)
            .with("FINDING_ID", &finding.id)
            .with("FINDING_DESCRIPTION", &finding.description)
            .with("FINDING_RESOLUTION", resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentOutput, TemplateSet};
    use crate::config::WorkflowConfig;
    use crate::git::WorkspaceManager;
    use crate::state::{PhaseOutcome, PhaseResult, StateStore};
    use crate::testing::{sample_issue, Reply, ScriptedRuntime};
    use crate::workflow::{Phase, PhaseOptions};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn review_reply(findings: serde_json::Value) -> Reply {
        Reply::Output(AgentOutput::success("reviewed").with_payload("findings", findings))
    }

    fn blocking(id: &str) -> serde_json::Value {
        json!({"id": id, "description": format!("problem {}", id), "severity": "blocking", "resolution": "fix it"})
    }

    fn executor(dir: &TempDir, runtime: Arc<ScriptedRuntime>, max_iterations: u32) -> PhaseExecutor {
        let settings = WorkflowConfig {
            max_resolution_iterations: max_iterations,
            ..WorkflowConfig::default()
        };
        PhaseExecutor::new(
            runtime,
            TemplateSet::new(None),
            StateStore::new(dir.path().join("runs")),
            WorkspaceManager::new(dir.path().join("repo"), dir.path().join("trees"), None),
            settings,
        )
    }

    fn run(dir: &TempDir, options: PhaseOptions) -> WorkflowRun {
        let mut run =
            WorkflowRun::new("r1", sample_issue("7"), &dir.path().join("trees"), options).unwrap();
        for phase in [Phase::Plan, Phase::Build, Phase::Test] {
            run.record_phase(PhaseResult::success(phase, Utc::now(), None))
                .unwrap();
        }
        run
    }

    #[tokio::test]
    async fn test_two_blocking_then_clean_resolves_in_one_cycle() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(
            ScriptedRuntime::new()
                .reply("review_round0", review_reply(json!([blocking("1"), blocking("2")])))
                .reply("review_round1", review_reply(json!([]))),
        );
        let executor = executor(&dir, runtime.clone(), 3);
        let run = run(&dir, PhaseOptions::default());

        let report = ResolutionLoop::new(&executor, 3, false)
            .run(&run, "review")
            .await
            .unwrap();

        assert_eq!(report.final_state, ResolutionState::Resolved);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.patches.len(), 2);
        assert_eq!(report.reviews.len(), 2);
        assert_eq!(
            report.transitions,
            vec![
                ResolutionState::Reviewing,
                ResolutionState::PatchPlanning,
                ResolutionState::Patching,
                ResolutionState::ReReviewing,
                ResolutionState::Resolved,
            ]
        );
        assert_eq!(
            runtime.agent_names(),
            vec![
                "review_round0",
                "review_plan_fix1_1",
                "review_plan_fix1_2",
                "review_fix1_1",
                "review_fix1_2",
                "review_round1",
            ]
        );
    }

    #[tokio::test]
    async fn test_patch_prompt_carries_finding_and_plan() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(
            ScriptedRuntime::new()
                .reply("review_round0", review_reply(json!([blocking("9")])))
                .reply(
                    "review_plan_fix",
                    Reply::Output(AgentOutput::success("planned").with_artifact("specs/patch/p9.md")),
                ),
        );
        let executor = executor(&dir, runtime.clone(), 3);
        let run = run(&dir, PhaseOptions::default());

        let report = ResolutionLoop::new(&executor, 3, false)
            .run(&run, "review")
            .await
            .unwrap();
        assert_eq!(report.patches[0].patch_plan, "specs/patch/p9.md");

        let requests = runtime.requests();
        let patch = requests
            .iter()
            .find(|r| r.agent_name == "review_fix1_1")
            .unwrap();
        assert!(patch.prompt.contains("problem 9"));
        assert!(patch.prompt.contains("specs/patch/p9.md"));
    }

    #[tokio::test]
    async fn test_loop_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut script = ScriptedRuntime::new();
        for round in 0..=5 {
            script = script.reply(
                &format!("review_round{}", round),
                review_reply(json!([blocking("1")])),
            );
        }
        let runtime = Arc::new(script);
        let executor = executor(&dir, runtime.clone(), 2);
        let run = run(&dir, PhaseOptions::default());

        let report = ResolutionLoop::new(&executor, 2, false)
            .run(&run, "review")
            .await
            .unwrap();

        assert_eq!(report.final_state, ResolutionState::Exhausted);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.reviews.len(), 3);
        assert_eq!(report.blocking().count(), 1);
        assert!(report.describe_blocking().contains("problem 1"));
    }

    #[tokio::test]
    async fn test_skip_resolution_reports_without_patching() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(
            ScriptedRuntime::new().reply("review_round0", review_reply(json!([blocking("1")]))),
        );
        let executor = executor(&dir, runtime.clone(), 3);
        let run = run(&dir, PhaseOptions::default());

        let report = ResolutionLoop::new(&executor, 3, true)
            .run(&run, "review")
            .await
            .unwrap();
        assert_eq!(report.final_state, ResolutionState::Exhausted);
        assert_eq!(report.iterations, 0);
        assert_eq!(runtime.agent_names(), vec!["review_round0"]);
    }

    #[tokio::test]
    async fn test_advisory_findings_do_not_block() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new().reply(
            "review_round0",
            review_reply(json!([
                {"id": 1, "description": "naming", "severity": "advisory"},
                {"id": 2, "description": "old style", "severity": "tech_debt"}
            ])),
        ));
        let executor = executor(&dir, runtime, 3);
        let run = run(&dir, PhaseOptions::default());

        let report = ResolutionLoop::new(&executor, 3, false)
            .run(&run, "review")
            .await
            .unwrap();
        assert_eq!(report.final_state, ResolutionState::Resolved);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0].id, "1");
    }

    #[tokio::test]
    async fn test_malformed_findings_are_protocol_errors() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(
            ScriptedRuntime::new().reply("review_round0", review_reply(json!("all good"))),
        );
        let executor = executor(&dir, runtime, 3);
        let run = run(&dir, PhaseOptions::default());

        let err = ResolutionLoop::new(&executor, 3, false)
            .run(&run, "review")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_exhausted_review_fails_the_phase() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(
            ScriptedRuntime::new().reply("review_round0", review_reply(json!([blocking("1")]))),
        );
        let executor = executor(&dir, runtime, 3);
        let mut run = run(&dir, PhaseOptions {
            skip_resolution: true,
            ..PhaseOptions::default()
        });

        let result = executor.run_phase(&mut run, Phase::Review).await.unwrap();
        assert_eq!(result.outcome, PhaseOutcome::Failure);
        assert_eq!(
            result.error.unwrap().kind,
            crate::error::ErrorKind::Unresolved
        );

        let stored = executor
            .store()
            .read_output(result.output_ref.as_deref().unwrap())
            .unwrap();
        assert_eq!(stored["final_state"], "exhausted");
    }
}
