//! Backend abstraction for coding agent executables

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::Result;

use super::spawn::AgentHandle;

mod claude;

pub use claude::ClaudeBackend;

/// A coding agent CLI that can be spawned against a workspace
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get the name of this backend
    fn name(&self) -> &'static str;

    /// Build the command to spawn this backend, without the prompt
    fn build_command(&self, workdir: &Path, env: &[(String, String)]) -> Command;

    /// Spawn an agent with a prompt
    async fn spawn(
        &self,
        prompt: &str,
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<AgentHandle>;

    /// Check if this backend is available on the system
    fn is_available(&self) -> bool;
}
