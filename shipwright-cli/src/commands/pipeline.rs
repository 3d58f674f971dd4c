//! Pipeline commands - start a run, run one phase, resume a run

use clap::Args;
use shipwright_core::state::RunStatus;
use shipwright_core::{Phase, PhaseOptions, WorkflowRun};

use super::context::Context;
use super::runs::print_run;

/// Arguments for the start command
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Issue id in the configured tracker (`sw-3` locally, `42` on GitHub)
    pub issue_id: String,

    /// Use this run id instead of a generated one
    #[arg(long)]
    pub run_id: Option<String>,

    /// Skip a phase (repeatable)
    #[arg(long = "skip", value_name = "PHASE")]
    pub skip: Vec<Phase>,

    /// Skip the document phase
    #[arg(long)]
    pub skip_document: bool,

    /// Tell the test phase to leave out end-to-end tests
    #[arg(long)]
    pub skip_e2e: bool,

    /// Report review findings without attempting fixes
    #[arg(long)]
    pub skip_resolution: bool,
}

impl StartArgs {
    fn options(&self) -> PhaseOptions {
        let mut options = PhaseOptions {
            skip_e2e: self.skip_e2e,
            skip_resolution: self.skip_resolution,
            ..Default::default()
        };
        for phase in &self.skip {
            options = options.skip(*phase);
        }
        if self.skip_document {
            options = options.skip(Phase::Document);
        }
        options
    }

    /// Execute the start command
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator().await?;
        let issue_ref = ctx.issue_ref(&self.issue_id);

        tracing::info!(issue = %issue_ref, "Starting pipeline");
        let run = orchestrator
            .start(issue_ref, self.options(), self.run_id.clone())
            .await?;
        finish(&run)
    }
}

/// Arguments for the phase command
#[derive(Args, Debug)]
pub struct PhaseArgs {
    /// Run to advance
    pub run_id: String,

    /// Phase to run; must be the run's next incomplete phase
    pub phase: Phase,

    /// Take over a lease left behind by a crashed orchestrator
    #[arg(long)]
    pub break_lease: bool,
}

impl PhaseArgs {
    /// Execute the phase command
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator().await?;
        if self.break_lease {
            orchestrator.store().break_lease(&self.run_id)?;
        }

        let run = orchestrator
            .run_single_phase(&self.run_id, self.phase)
            .await?;
        print_run(&run);

        match run.phase_entry(self.phase) {
            Some(entry) if entry.outcome.is_complete() => Ok(()),
            _ if run.status == RunStatus::Succeeded => Ok(()),
            _ => anyhow::bail!("phase {} did not complete for run {}", self.phase, run.run_id),
        }
    }
}

/// Arguments for the resume command
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Run to continue
    pub run_id: String,

    /// Take over a lease left behind by a crashed orchestrator
    #[arg(long)]
    pub break_lease: bool,
}

impl ResumeArgs {
    /// Execute the resume command
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator().await?;
        if self.break_lease {
            orchestrator.store().break_lease(&self.run_id)?;
        }

        let run = orchestrator.resume(&self.run_id).await?;
        finish(&run)
    }
}

/// Print the run and turn a non-successful end into a non-zero exit
fn finish(run: &WorkflowRun) -> anyhow::Result<()> {
    print_run(run);
    if run.status == RunStatus::Succeeded {
        return Ok(());
    }

    let reason = run
        .last_error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no error recorded".to_string());
    anyhow::bail!("run {} ended {}: {}", run.run_id, run.status, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        start: StartArgs,
    }

    #[test]
    fn test_skip_flags_build_options() {
        let harness = Harness::parse_from([
            "start",
            "sw-3",
            "--skip",
            "review",
            "--skip-document",
            "--skip-e2e",
        ]);
        let options = harness.start.options();

        assert!(options.should_skip(Phase::Review));
        assert!(options.should_skip(Phase::Document));
        assert!(!options.should_skip(Phase::Test));
        assert!(options.skip_e2e);
        assert!(!options.skip_resolution);
    }

    #[test]
    fn test_unknown_phase_rejected() {
        assert!(Harness::try_parse_from(["start", "sw-3", "--skip", "deploy"]).is_err());
    }
}
