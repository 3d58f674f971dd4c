//! Handle to a spawned agent subprocess

use tokio::process::Child;

use crate::{Error, Result};

/// Handle to a running agent process
pub struct AgentHandle {
    /// The child process (not Debug, so we skip it)
    child: Child,
    /// The prompt that was given to the agent
    prompt: String,
    /// Working directory for the agent
    workdir: String,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("workdir", &self.workdir)
            .field("prompt_len", &self.prompt.len())
            .field("child", &"<Child>")
            .finish()
    }
}

impl AgentHandle {
    pub fn new(child: Child, prompt: String, workdir: String) -> Self {
        Self {
            child,
            prompt,
            workdir,
        }
    }

    /// Get the prompt this agent is working on
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Get the working directory
    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// OS process id, if the process is still running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Get mutable access to the child process for output streaming
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Wait for the process to complete and return the exit status
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(Error::Io)
    }

    /// Kill the agent process and reap it
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(Error::Io)
    }
}
