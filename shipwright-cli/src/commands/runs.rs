//! Run inspection commands - list, show, abort, reclaim

use chrono::Utc;
use clap::Args;
use shipwright_core::workflow::AbortOutcome;
use shipwright_core::WorkflowRun;

use super::context::Context;

/// Arguments for the show command
#[derive(Args, Debug)]
pub struct ShowArgs {
    pub run_id: String,
}

/// Arguments for the abort command
#[derive(Args, Debug)]
pub struct AbortArgs {
    pub run_id: String,

    /// Reason recorded against the run
    #[arg(long, default_value = "aborted by operator")]
    pub reason: String,
}

/// Arguments for the reclaim command
#[derive(Args, Debug)]
pub struct ReclaimArgs {
    pub run_id: String,
}

/// List active runs
pub async fn list(ctx: &Context) -> anyhow::Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let runs = orchestrator.list_active()?;

    if runs.is_empty() {
        println!("No active runs.");
        return Ok(());
    }

    println!("Active Runs:");
    println!();
    for run in &runs {
        let next = run
            .next_phase()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let leased = if orchestrator.store().is_leased(&run.run_id) {
            " (in use)"
        } else {
            ""
        };
        println!(
            "  {}  {:<8} next: {:<9} {}  updated {} ago{}",
            run.run_id,
            run.status.to_string(),
            next,
            run.issue_ref,
            format_duration((Utc::now() - run.updated_at).num_seconds()),
            leased
        );
    }
    Ok(())
}

impl ShowArgs {
    /// Execute the show command
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator().await?;
        let (run, report) = orchestrator.show(&self.run_id)?;
        print_run(&run);

        println!();
        if report.is_consistent() {
            println!("Workspace: consistent");
        } else {
            println!("Workspace problems:");
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
        if orchestrator.store().abort_requested(&run.run_id) {
            println!("Abort requested; the owning orchestrator stops at the next phase boundary");
        }
        Ok(())
    }
}

impl AbortArgs {
    /// Execute the abort command
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator().await?;
        match orchestrator.abort(&self.run_id, &self.reason)? {
            AbortOutcome::Aborted(run) => {
                println!("Run {} aborted. Workspace kept at {}", run.run_id, run.workspace_path.display());
            }
            AbortOutcome::Requested => {
                println!(
                    "Run {} is being driven elsewhere; abort requested for the next phase boundary",
                    self.run_id
                );
            }
        }
        Ok(())
    }
}

impl ReclaimArgs {
    /// Execute the reclaim command
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator().await?;
        let run = orchestrator.reclaim(&self.run_id)?;
        println!(
            "Reclaimed workspace {} of run {} ({})",
            run.workspace_path.display(),
            run.run_id,
            run.status
        );
        Ok(())
    }
}

/// Human-readable summary of a run
pub fn print_run(run: &WorkflowRun) {
    println!();
    println!("Run {}", run.run_id);
    println!("  Issue:     {} {}", run.issue_ref, run.issue.title);
    println!("  Status:    {}", run.status);
    println!("  Branch:    {}", run.branch_name);
    println!("  Workspace: {}", run.workspace_path.display());
    if let Some(ports) = &run.ports {
        println!(
            "  Ports:     backend {} / frontend {}",
            ports.primary_port, ports.secondary_port
        );
    }
    if let Some(plan) = &run.plan_ref {
        println!("  Plan:      {}", plan);
    }

    if !run.phase_history.is_empty() {
        println!("  Phases:");
        for entry in &run.phase_history {
            let took = (entry.ended_at - entry.started_at).num_seconds();
            print!(
                "    {:<9} {:<8} attempts {} ({})",
                entry.phase_name.to_string(),
                entry.outcome.to_string(),
                entry.attempts,
                format_duration(took)
            );
            if let Some(err) = &entry.error {
                print!("  {}", err);
            }
            println!();
        }
    }

    if let Some(err) = &run.last_error {
        println!("  Last error: {}", err);
    }
}

/// Format a duration in seconds as a human-readable string
fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(-5), "0s");
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(125), "2m");
        assert_eq!(format_duration(3 * 3600 + 20 * 60), "3h 20m");
        assert_eq!(format_duration(2 * 86400 + 3600), "2d 1h");
    }
}
