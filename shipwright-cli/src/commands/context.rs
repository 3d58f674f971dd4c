//! Shared setup: repository discovery, tracker and orchestrator construction

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use shipwright_core::agent::{Backend, ClaudeBackend, CliRuntime};
use shipwright_core::git::GitRepo;
use shipwright_core::secrets::Secrets;
use shipwright_core::{BackendKind, Config, IssueRef, IssueTracker, Orchestrator};
use shipwright_db::LocalTracker;
use shipwright_github::{GitHubClient, RemoteTracker};

/// Effective configuration plus the repository it applies to
pub struct Context {
    pub config: Config,
    pub repo_root: PathBuf,
}

impl Context {
    /// Resolve the main checkout of the repository containing the current directory
    pub fn discover(config: Config) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let repo = GitRepo::open_main(&cwd)?;
        Ok(Self {
            repo_root: repo.root().to_path_buf(),
            config,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.config.tracker.backend
    }

    pub fn local_db(&self) -> PathBuf {
        self.config.local_db(&self.repo_root)
    }

    /// Reference to `id` in the configured backend
    pub fn issue_ref(&self, id: &str) -> IssueRef {
        IssueRef::new(self.backend(), id.trim_start_matches('#'))
    }

    pub async fn tracker(&self) -> anyhow::Result<Arc<dyn IssueTracker>> {
        match self.backend() {
            BackendKind::Local => {
                let path = self.local_db();
                let tracker = LocalTracker::open(&path)
                    .await
                    .with_context(|| format!("Failed to open local tracker at {}", path.display()))?;
                Ok(Arc::new(tracker))
            }
            BackendKind::Remote => {
                let repo = self.config.tracker.github_repo.as_deref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "The remote tracker needs a repository. Set tracker.github_repo \
                         or SHIPWRIGHT_GITHUB_REPO to owner/repo"
                    )
                })?;
                let token = Secrets::load()?.github_token().ok_or_else(|| {
                    anyhow::anyhow!(
                        "GitHub token not found. Set GITHUB_TOKEN or add it to {}",
                        secrets_hint()
                    )
                })?;
                let client = GitHubClient::from_url(repo, &token)?;
                Ok(Arc::new(RemoteTracker::new(client)))
            }
        }
    }

    pub async fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let backend = ClaudeBackend::from_config(&self.config.agent);
        if !backend.is_available() {
            tracing::warn!(
                claude_path = %self.config.agent.claude_path,
                "Agent executable not found on PATH; phases will fail until it is installed"
            );
        }
        let runtime = Arc::new(CliRuntime::new(Box::new(backend), self.config.agent.timeout));
        let tracker = self.tracker().await?;

        Ok(Orchestrator::new(
            &self.config,
            &self.repo_root,
            tracker,
            runtime,
        )?)
    }
}

fn secrets_hint() -> String {
    Secrets::default_secrets_path()
        .as_deref()
        .map(Path::display)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "the secrets file".to_string())
}
