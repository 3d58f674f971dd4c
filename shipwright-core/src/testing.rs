//! Test fixtures: throwaway git repositories, a scripted agent runtime and
//! an in-memory issue tracker

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use git2::{Repository, RepositoryInitOptions, Signature};

use crate::agent::{AgentOutput, AgentRequest, AgentRuntime};
use crate::tracker::{BackendKind, IssueDetails, IssueRef, IssueStatus, IssueTracker};
use crate::{Error, Result};

/// Create a repository at `path` with one commit on `main`
pub fn init_repo(path: &Path) -> PathBuf {
    std::fs::create_dir_all(path).unwrap();
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(path, &opts).unwrap();

    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();

    std::fs::write(path.join("README.md"), "# test\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("Test User", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .unwrap();

    path.canonicalize().unwrap()
}

pub fn sample_issue(id: &str) -> IssueDetails {
    IssueDetails {
        issue_ref: IssueRef::local(id),
        title: "Add CSV export to reports".to_string(),
        body: "Users want to download reports as CSV.".to_string(),
        status: IssueStatus::Open,
        labels: vec!["feature".to_string()],
        issue_type: None,
        priority: Some(2),
    }
}

/// Canned reply for [`ScriptedRuntime`]
#[derive(Debug, Clone)]
pub enum Reply {
    Output(AgentOutput),
    Agent(String),
    Protocol(String),
}

/// Agent runtime that answers from a script
///
/// Each scripted reply is keyed by an agent-name prefix and used once, in
/// order. Unscripted invocations succeed: plans and patch plans name an
/// artifact, reviews report no findings.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    script: Mutex<Vec<(String, Reply)>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, agent_prefix: impl Into<String>, reply: Reply) -> Self {
        self.script.lock().unwrap().push((agent_prefix.into(), reply));
        self
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.agent_name)
            .collect()
    }

    fn default_reply(agent_name: &str) -> AgentOutput {
        if agent_name.starts_with("plan") {
            AgentOutput::success("planned").with_artifact("specs/plan.md")
        } else if agent_name.contains("_plan_fix") {
            AgentOutput::success("patch planned").with_artifact("specs/patch/patch.md")
        } else if agent_name.contains("_round") {
            AgentOutput::success("no findings").with_payload("findings", serde_json::json!([]))
        } else {
            AgentOutput::success(format!("{} done", agent_name))
        }
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentOutput> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = {
            let mut script = self.script.lock().unwrap();
            script
                .iter()
                .position(|(prefix, _)| request.agent_name.starts_with(prefix.as_str()))
                .map(|i| script.remove(i).1)
        };

        match scripted {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Agent(message)) => Err(Error::Agent(message)),
            Some(Reply::Protocol(message)) => Err(Error::Protocol(message)),
            None => Ok(Self::default_reply(&request.agent_name)),
        }
    }
}

/// Issue tracker backed by a map
#[derive(Debug)]
pub struct MemoryTracker {
    kind: BackendKind,
    issues: Mutex<HashMap<String, IssueDetails>>,
    close_reasons: Mutex<HashMap<String, String>>,
    next_id: Mutex<u32>,
}

impl MemoryTracker {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            issues: Mutex::new(HashMap::new()),
            close_reasons: Mutex::new(HashMap::new()),
            next_id: Mutex::new(100),
        }
    }

    pub fn with_issue(self, mut issue: IssueDetails) -> Self {
        issue.issue_ref.backend_kind = self.kind;
        self.issues
            .lock()
            .unwrap()
            .insert(issue.issue_ref.external_id.clone(), issue);
        self
    }

    pub fn status_of(&self, id: &str) -> Option<IssueStatus> {
        self.issues.lock().unwrap().get(id).map(|i| i.status)
    }

    pub fn close_reason(&self, id: &str) -> Option<String> {
        self.close_reasons.lock().unwrap().get(id).cloned()
    }

    fn with_issue_mut<T>(&self, issue: &IssueRef, f: impl FnOnce(&mut IssueDetails) -> T) -> Result<T> {
        let mut issues = self.issues.lock().unwrap();
        let details = issues
            .get_mut(&issue.external_id)
            .ok_or_else(|| Error::NotFound(format!("issue {}", issue)))?;
        Ok(f(details))
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch_ready(&self) -> Result<Vec<IssueRef>> {
        let issues = self.issues.lock().unwrap();
        let mut ready: Vec<&IssueDetails> = issues
            .values()
            .filter(|i| i.status == IssueStatus::Open)
            .collect();
        ready.sort_by(|a, b| a.issue_ref.external_id.cmp(&b.issue_ref.external_id));
        Ok(ready.into_iter().map(|i| i.issue_ref.clone()).collect())
    }

    async fn fetch(&self, issue: &IssueRef) -> Result<IssueDetails> {
        self.with_issue_mut(issue, |details| details.clone())
    }

    async fn update_status(&self, issue: &IssueRef, status: IssueStatus) -> Result<()> {
        self.with_issue_mut(issue, |details| details.status = status)
    }

    async fn close(&self, issue: &IssueRef, reason: &str) -> Result<()> {
        self.with_issue_mut(issue, |details| details.status = IssueStatus::Closed)?;
        self.close_reasons
            .lock()
            .unwrap()
            .insert(issue.external_id.clone(), reason.to_string());
        Ok(())
    }

    async fn create_linked(&self, parent: &IssueRef, title: &str, priority: u8) -> Result<IssueRef> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            next.to_string()
        };
        let issue_ref = IssueRef::new(self.kind, &id).with_discovered_from(parent.clone());
        let details = IssueDetails {
            issue_ref: issue_ref.clone(),
            title: title.to_string(),
            body: String::new(),
            status: IssueStatus::Open,
            labels: Vec::new(),
            issue_type: None,
            priority: Some(priority),
        };
        self.issues.lock().unwrap().insert(id, details);
        Ok(issue_ref)
    }
}
