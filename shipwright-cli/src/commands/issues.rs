//! Issue commands - ready work and local issue management

use clap::{Args, Subcommand};
use shipwright_core::{BackendKind, IssueStatus};
use shipwright_db::{Database, DependencyType, NewIssue};

use super::context::Context;

/// List issues ready to be worked on
pub async fn ready(ctx: &Context) -> anyhow::Result<()> {
    let tracker = ctx.tracker().await?;
    let ready = tracker.fetch_ready().await?;

    if ready.is_empty() {
        println!("No ready issues in the {} tracker.", tracker.kind());
        return Ok(());
    }

    println!("Ready Issues ({}):", tracker.kind());
    println!();
    for issue_ref in &ready {
        match tracker.fetch(issue_ref).await {
            Ok(details) => println!(
                "  {:<8} P{}  [{}] {}",
                details.issue_ref.external_id,
                details
                    .priority
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                details.work_class(),
                details.title
            ),
            Err(e) => {
                tracing::warn!(issue = %issue_ref, error = %e, "Failed to fetch issue");
                println!("  {}", issue_ref.external_id);
            }
        }
    }
    Ok(())
}

/// Manage issues in the local tracker
#[derive(Args, Debug)]
pub struct IssueArgs {
    #[command(subcommand)]
    pub command: IssueCommand,
}

#[derive(Subcommand, Debug)]
pub enum IssueCommand {
    /// Create an issue
    Create {
        title: String,

        /// Longer description handed to the agents
        #[arg(short, long, default_value = "")]
        description: String,

        /// 0 (most urgent) to 4
        #[arg(short, long, default_value_t = 2)]
        priority: u8,

        /// bug, feature, task or chore
        #[arg(short = 't', long = "type", default_value = "task")]
        issue_type: String,

        /// Label to attach (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Issue that must close before this one is ready (repeatable)
        #[arg(long = "blocked-by", value_name = "ISSUE")]
        blocked_by: Vec<String>,
    },

    /// List issues
    List {
        /// Only issues with this status (open, in_progress, blocked, closed)
        #[arg(short, long)]
        status: Option<IssueStatus>,
    },

    /// Record that ISSUE cannot start until BLOCKER is closed
    Block { issue: String, blocker: String },
}

impl IssueArgs {
    /// Execute the issue command
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        if ctx.backend() != BackendKind::Local {
            anyhow::bail!("issue management is only available for the local tracker");
        }
        let db = Database::new(ctx.local_db()).await?;

        match &self.command {
            IssueCommand::Create {
                title,
                description,
                priority,
                issue_type,
                labels,
                blocked_by,
            } => {
                let mut new_issue = NewIssue::new(title.as_str())
                    .with_description(description.as_str())
                    .with_priority(*priority)
                    .with_type(issue_type.as_str());
                for label in labels {
                    new_issue = new_issue.with_label(label.as_str());
                }

                let issue = db.issues().create(new_issue).await?;
                for blocker in blocked_by {
                    db.dependencies()
                        .add(&issue.id, blocker, DependencyType::Blocks)
                        .await?;
                }
                println!("Created {}: {}", issue.id, issue.title);
            }
            IssueCommand::List { status } => {
                let issues = db.issues().list(*status).await?;
                if issues.is_empty() {
                    println!("No issues.");
                }
                for issue in &issues {
                    println!(
                        "  {:<8} P{}  {:<11} {}",
                        issue.id, issue.priority, issue.status, issue.title
                    );
                }
            }
            IssueCommand::Block { issue, blocker } => {
                db.dependencies()
                    .add(issue, blocker, DependencyType::Blocks)
                    .await?;
                println!("{} is now blocked by {}", issue, blocker);
            }
        }
        Ok(())
    }
}
