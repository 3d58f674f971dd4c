//! Claude Code backend implementation

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::AgentConfig;
use crate::{Error, Result};

use super::super::spawn::AgentHandle;
use super::Backend;

/// Claude Code backend implementation
#[derive(Debug, Clone)]
pub struct ClaudeBackend {
    pub claude_path: String,
    pub model: Option<String>,
}

impl ClaudeBackend {
    /// Create a new Claude backend with default settings
    pub fn new() -> Self {
        Self {
            claude_path: "claude".to_string(),
            model: None,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            claude_path: config.claude_path.clone(),
            model: config.model.clone(),
        }
    }

    /// Create a Claude backend with custom path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.claude_path = path.into();
        self
    }

    /// Create a Claude backend with a specific model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl Default for ClaudeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ClaudeBackend {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn build_command(&self, workdir: &Path, env: &[(String, String)]) -> Command {
        let mut cmd = Command::new(&self.claude_path);
        cmd.arg("--print")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--dangerously-skip-permissions");

        if let Some(ref model) = self.model {
            cmd.arg("--model").arg(model);
        }

        for (key, value) in env {
            cmd.env(key, value);
        }

        cmd.current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    async fn spawn(
        &self,
        prompt: &str,
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<AgentHandle> {
        let workdir_str = workdir
            .to_str()
            .ok_or_else(|| Error::Agent("Invalid working directory path".to_string()))?
            .to_string();

        if !workdir.exists() {
            return Err(Error::Agent(format!(
                "Working directory does not exist: {}",
                workdir_str
            )));
        }

        let mut cmd = self.build_command(workdir, env);
        cmd.arg(prompt);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Agent(format!(
                    "Claude executable not found at '{}'. Is Claude Code installed?",
                    self.claude_path
                ))
            } else {
                Error::Io(e)
            }
        })?;

        Ok(AgentHandle::new(child, prompt.to_string(), workdir_str))
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.claude_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_backend_builder() {
        let backend = ClaudeBackend::new()
            .with_path("/custom/claude")
            .with_model("opus");

        assert_eq!(backend.name(), "claude");
        assert_eq!(backend.claude_path, "/custom/claude");
        assert_eq!(backend.model, Some("opus".to_string()));
    }

    #[test]
    fn test_command_arguments() {
        let backend = ClaudeBackend::new().with_model("sonnet");
        let env = vec![("BACKEND_PORT".to_string(), "9101".to_string())];
        let cmd = backend.build_command(Path::new("/tmp"), &env);
        let std_cmd = cmd.as_std();

        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "--print",
                "--verbose",
                "--output-format",
                "stream-json",
                "--dangerously-skip-permissions",
                "--model",
                "sonnet"
            ]
        );
        let envs: Vec<_> = std_cmd.get_envs().collect();
        assert!(envs
            .iter()
            .any(|(k, v)| *k == "BACKEND_PORT" && v.map(|v| v == "9101").unwrap_or(false)));
    }

    #[tokio::test]
    async fn test_claude_spawn_invalid_workdir() {
        let backend = ClaudeBackend::new();
        let result = backend.spawn("test", Path::new("/nonexistent/path"), &[]).await;
        assert!(matches!(result, Err(Error::Agent(_))));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let backend = ClaudeBackend::new().with_path("/usr/bin/nonexistent-claude-binary");
        let dir = std::env::temp_dir();
        let result = backend.spawn("test", &dir, &[]).await;
        assert!(matches!(result, Err(Error::Agent(_))));
    }
}
