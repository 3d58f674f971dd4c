//! The persisted record of one workflow run

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::ports::PortAllocation;
use crate::tracker::{IssueDetails, IssueRef};
use crate::workflow::{Phase, PhaseOptions};
use crate::{Error, Result};

/// Version of the on-disk run record. Bump on any incompatible change.
pub const SCHEMA_VERSION: u32 = 1;

/// Words of the issue title kept in branch names
const SLUG_WORDS: usize = 5;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Aborted
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    Success,
    Failure,
    Skipped,
}

impl PhaseOutcome {
    /// Whether downstream phases may proceed
    pub fn is_complete(&self) -> bool {
        matches!(self, PhaseOutcome::Success | PhaseOutcome::Skipped)
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseOutcome::Success => "success",
            PhaseOutcome::Failure => "failure",
            PhaseOutcome::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Error recorded against a phase entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PhaseError {
    pub fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Result of running (or skipping) one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_name: Phase,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: PhaseOutcome,
    /// Location of the structured result the phase produced
    #[serde(default)]
    pub output_ref: Option<String>,
    /// Attempts consumed, including the one that produced this outcome
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<PhaseError>,
}

fn default_attempts() -> u32 {
    1
}

impl PhaseResult {
    pub fn skipped(phase: Phase) -> Self {
        let now = Utc::now();
        Self {
            phase_name: phase,
            started_at: now,
            ended_at: now,
            outcome: PhaseOutcome::Skipped,
            output_ref: None,
            attempts: 0,
            error: None,
        }
    }

    pub fn success(phase: Phase, started_at: DateTime<Utc>, output_ref: Option<String>) -> Self {
        Self {
            phase_name: phase,
            started_at,
            ended_at: Utc::now(),
            outcome: PhaseOutcome::Success,
            output_ref,
            attempts: 1,
            error: None,
        }
    }

    pub fn failure(
        phase: Phase,
        started_at: DateTime<Utc>,
        output_ref: Option<String>,
        error: PhaseError,
    ) -> Self {
        Self {
            phase_name: phase,
            started_at,
            ended_at: Utc::now(),
            outcome: PhaseOutcome::Failure,
            output_ref,
            attempts: 1,
            error: Some(error),
        }
    }
}

/// One end-to-end execution of the pipeline for one issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub schema_version: u32,
    pub run_id: String,
    pub issue_ref: IssueRef,
    /// Snapshot of the issue taken when the run was created
    pub issue: IssueDetails,
    pub branch_name: String,
    /// Set by the plan phase, immutable afterwards
    pub plan_ref: Option<String>,
    pub ports: Option<PortAllocation>,
    pub workspace_path: PathBuf,
    pub phase_history: Vec<PhaseResult>,
    pub status: RunStatus,
    #[serde(default)]
    pub options: PhaseOptions,
    /// Most recent error, mirrored into the final history entry on abort
    #[serde(default)]
    pub last_error: Option<PhaseError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Create a pending run for `issue`, placing its workspace under `trees_dir`
    pub fn new(
        run_id: impl Into<String>,
        issue: IssueDetails,
        trees_dir: &std::path::Path,
        options: PhaseOptions,
    ) -> Result<Self> {
        let run_id = run_id.into();
        validate_run_id(&run_id)?;

        let now = Utc::now();
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            branch_name: branch_name(&issue, &run_id),
            workspace_path: trees_dir.join(&run_id),
            issue_ref: issue.issue_ref.clone(),
            issue,
            run_id,
            plan_ref: None,
            ports: None,
            phase_history: Vec::new(),
            status: RunStatus::Pending,
            options,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Latest entry for `phase`, if any
    pub fn phase_entry(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phase_history
            .iter()
            .rev()
            .find(|r| r.phase_name == phase)
    }

    pub fn is_phase_complete(&self, phase: Phase) -> bool {
        self.phase_entry(phase)
            .map(|r| r.outcome.is_complete())
            .unwrap_or(false)
    }

    /// First phase without a success or skipped entry
    pub fn next_phase(&self) -> Option<Phase> {
        Phase::ALL
            .iter()
            .copied()
            .find(|p| !self.is_phase_complete(*p))
    }

    /// Append a phase result, keeping history in pipeline order
    ///
    /// A retry of a failed phase replaces that phase's trailing failure entry
    /// and carries its attempt count forward.
    pub fn record_phase(&mut self, mut result: PhaseResult) -> Result<()> {
        let expected = self.next_phase().ok_or_else(|| {
            Error::Consistency(format!(
                "run {} has completed every phase, cannot record {}",
                self.run_id, result.phase_name
            ))
        })?;
        if result.phase_name != expected {
            return Err(Error::Consistency(format!(
                "run {} expects phase {} next, got {}",
                self.run_id, expected, result.phase_name
            )));
        }

        if let Some(last) = self.phase_history.last() {
            if last.outcome == PhaseOutcome::Failure {
                // next_phase() guarantees the failed entry is for this phase
                result.attempts = result.attempts.max(last.attempts + 1);
                self.phase_history.pop();
            }
        }

        if let Some(err) = &result.error {
            self.last_error = Some(err.clone());
        }
        self.phase_history.push(result);
        self.touch();
        Ok(())
    }

    /// Set the plan artifact. Setting a different value once set is rejected.
    pub fn set_plan_ref(&mut self, plan_ref: impl Into<String>) -> Result<()> {
        let plan_ref = plan_ref.into();
        match &self.plan_ref {
            Some(existing) if *existing != plan_ref => Err(Error::Consistency(format!(
                "plan for run {} is already {}, refusing to replace with {}",
                self.run_id, existing, plan_ref
            ))),
            Some(_) => Ok(()),
            None => {
                self.plan_ref = Some(plan_ref);
                self.touch();
                Ok(())
            }
        }
    }

    /// Output references of completed phases, in pipeline order
    pub fn prior_outputs(&self) -> Vec<(Phase, &str)> {
        self.phase_history
            .iter()
            .filter(|r| r.outcome == PhaseOutcome::Success)
            .filter_map(|r| r.output_ref.as_deref().map(|o| (r.phase_name, o)))
            .collect()
    }

    /// Move to `aborted`, attaching the error to the final history entry
    pub fn mark_aborted(&mut self, error: PhaseError) {
        self.stop(RunStatus::Aborted, error);
    }

    /// Move to `failed` after a fatal error
    pub fn mark_failed(&mut self, error: PhaseError) {
        self.stop(RunStatus::Failed, error);
    }

    fn stop(&mut self, status: RunStatus, error: PhaseError) {
        if let Some(last) = self.phase_history.last_mut() {
            last.error = Some(error.clone());
        }
        self.last_error = Some(error);
        self.status = status;
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fresh 8-character run id
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Run ids name directories and branches, so keep them to a safe alphabet
pub fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 64
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::Config(format!(
            "invalid run id '{}': use 1-64 characters from [A-Za-z0-9_-]",
            run_id
        )));
    }
    Ok(())
}

/// `{class}-issue-{id}-adw-{run_id}-{slug}`
pub fn branch_name(issue: &IssueDetails, run_id: &str) -> String {
    let words: Vec<&str> = issue.title.split_whitespace().take(SLUG_WORDS).collect();
    let slug = slugify(&words.join(" "));
    let id = slugify(&issue.issue_ref.external_id);

    let mut name = format!("{}-issue-{}-adw-{}", issue.work_class(), id, run_id);
    if !slug.is_empty() {
        name.push('-');
        name.push_str(&slug);
    }
    name
}

fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::IssueStatus;
    use std::path::Path;

    fn issue() -> IssueDetails {
        IssueDetails {
            issue_ref: IssueRef::local("sw-12"),
            title: "Add CSV export to the reports page!".to_string(),
            body: "Users want CSV".to_string(),
            status: IssueStatus::Open,
            labels: vec!["feature".to_string()],
            issue_type: None,
            priority: Some(1),
        }
    }

    fn run() -> WorkflowRun {
        WorkflowRun::new("a1b2c3d4", issue(), Path::new("/trees"), PhaseOptions::default())
            .unwrap()
    }

    #[test]
    fn test_new_run_derives_paths() {
        let run = run();
        assert_eq!(run.workspace_path, PathBuf::from("/trees/a1b2c3d4"));
        assert_eq!(
            run.branch_name,
            "feature-issue-sw-12-adw-a1b2c3d4-add-csv-export-to-the"
        );
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.next_phase(), Some(Phase::Plan));
    }

    #[test]
    fn test_run_id_validation() {
        assert!(validate_run_id("r1").is_ok());
        assert!(validate_run_id("run_2-b").is_ok());
        assert!(validate_run_id("").is_err());
        assert!(validate_run_id("../etc").is_err());
        assert!(validate_run_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_generated_id_is_valid() {
        let id = generate_run_id();
        assert_eq!(id.len(), 8);
        assert!(validate_run_id(&id).is_ok());
    }

    #[test]
    fn test_record_phase_enforces_order() {
        let mut run = run();
        let err = run
            .record_phase(PhaseResult::skipped(Phase::Build))
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));

        run.record_phase(PhaseResult::success(Phase::Plan, Utc::now(), None))
            .unwrap();
        run.record_phase(PhaseResult::skipped(Phase::Build)).unwrap();
        assert_eq!(run.next_phase(), Some(Phase::Test));
    }

    #[test]
    fn test_retry_replaces_failed_entry() {
        let mut run = run();
        let error = PhaseError {
            kind: ErrorKind::Agent,
            message: "timed out".to_string(),
        };
        run.record_phase(PhaseResult::failure(Phase::Plan, Utc::now(), None, error.clone()))
            .unwrap();
        run.record_phase(PhaseResult::success(Phase::Plan, Utc::now(), Some("out".into())))
            .unwrap();

        assert_eq!(run.phase_history.len(), 1);
        assert_eq!(run.phase_history[0].outcome, PhaseOutcome::Success);
        assert_eq!(run.phase_history[0].attempts, 2);
        assert_eq!(run.last_error, Some(error));
    }

    #[test]
    fn test_plan_ref_is_immutable() {
        let mut run = run();
        run.set_plan_ref("specs/a.md").unwrap();
        run.set_plan_ref("specs/a.md").unwrap();
        assert!(run.set_plan_ref("specs/b.md").is_err());
        assert_eq!(run.plan_ref.as_deref(), Some("specs/a.md"));
    }

    #[test]
    fn test_mark_aborted_annotates_final_entry() {
        let mut run = run();
        run.record_phase(PhaseResult::success(Phase::Plan, Utc::now(), None))
            .unwrap();
        run.mark_aborted(PhaseError {
            kind: ErrorKind::Agent,
            message: "build timed out".to_string(),
        });

        assert_eq!(run.status, RunStatus::Aborted);
        let last = run.phase_history.last().unwrap();
        assert_eq!(last.error.as_ref().unwrap().message, "build timed out");
    }

    #[test]
    fn test_branch_name_without_title_words() {
        let mut details = issue();
        details.title = "!!!".to_string();
        details.labels.clear();
        assert_eq!(branch_name(&details, "r1"), "chore-issue-sw-12-adw-r1");
    }
}
