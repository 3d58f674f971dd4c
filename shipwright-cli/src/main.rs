//! Shipwright CLI - operator control surface for Shipwright runs
//!
//! Starts, resumes, inspects and aborts agent pipeline runs for issues from
//! the configured tracker.

mod commands;

use clap::{Parser, Subcommand};
use shipwright_core::secrets::Secrets;
use shipwright_core::{BackendKind, Config};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    AbortArgs, Context, IssueArgs, PhaseArgs, ReclaimArgs, ResumeArgs, ShowArgs, StartArgs,
};

/// Shipwright: drive coding agents from issue to shipped branch
#[derive(Parser, Debug)]
#[command(name = "shipwright")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to claude executable (overrides config and env)
    #[arg(long, global = true)]
    claude_path: Option<String>,

    /// Model to use (overrides config and env)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Issue tracker backend: local or remote (overrides config and env)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole pipeline for an issue
    Start(StartArgs),

    /// Run a single phase of an existing run
    Phase(PhaseArgs),

    /// Continue a run at its first incomplete phase
    Resume(ResumeArgs),

    /// List issues ready to be worked on
    Ready,

    /// List active runs
    #[command(visible_alias = "ls")]
    List,

    /// Show a run and check its workspace
    Show(ShowArgs),

    /// Force-abort a run
    Abort(AbortArgs),

    /// Remove the workspace of a finished run
    Reclaim(ReclaimArgs),

    /// Manage issues in the local tracker
    Issue(IssueArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = Config::load_with_overrides(cli.claude_path.clone(), cli.model.clone(), cli.backend)?;

    if cli.verbose {
        tracing::debug!(
            claude_path = %config.agent.claude_path,
            model = ?config.agent.model,
            backend = %config.tracker.backend,
            "Configuration loaded"
        );
    }

    let Some(command) = cli.command else {
        println!("Shipwright - drive coding agents from issue to shipped branch");
        println!();
        println!("Use --help for usage information");
        return Ok(());
    };

    if let Commands::Config = command {
        print_config(&config)?;
        return Ok(());
    }

    let ctx = Context::discover(config)?;
    match command {
        Commands::Start(args) => args.execute(&ctx).await?,
        Commands::Phase(args) => args.execute(&ctx).await?,
        Commands::Resume(args) => args.execute(&ctx).await?,
        Commands::Ready => commands::issues::ready(&ctx).await?,
        Commands::List => commands::runs::list(&ctx).await?,
        Commands::Show(args) => args.execute(&ctx).await?,
        Commands::Abort(args) => args.execute(&ctx).await?,
        Commands::Reclaim(args) => args.execute(&ctx).await?,
        Commands::Issue(args) => args.execute(&ctx).await?,
        Commands::Config => {}
    }

    Ok(())
}

fn print_config(config: &Config) -> anyhow::Result<()> {
    println!("Shipwright Configuration");
    println!("========================");
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    println!();

    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }

    let token = Secrets::load()
        .ok()
        .and_then(|s| s.github_token())
        .is_some();
    println!("GitHub token: {}", if token { "configured" } else { "not set" });
    Ok(())
}
