//! Agent invocation
//!
//! [`AgentRuntime`] is the seam between the pipeline and the external coding
//! agent: a rendered prompt and a working directory go in, a validated
//! [`AgentOutput`] comes out. [`CliRuntime`] drives a [`Backend`] subprocess
//! with a timeout and keeps its raw transcript.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use super::backends::Backend;
use super::output::{CollectingHandler, OutputStreamer};
use super::result::AgentOutput;
use crate::{Error, Result};

/// File name of the raw transcript inside an agent's log directory
pub const RAW_OUTPUT_FILE: &str = "raw_output.jsonl";

/// One agent invocation
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Logical agent name, e.g. `plan` or `patch_2_1`
    pub agent_name: String,
    pub prompt: String,
    pub workdir: PathBuf,
    /// Extra environment for the agent process
    pub env: Vec<(String, String)>,
    /// Where to keep the raw transcript
    pub log_dir: Option<PathBuf>,
}

impl AgentRequest {
    pub fn new(agent_name: impl Into<String>, prompt: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            workdir: workdir.into(),
            env: Vec::new(),
            log_dir: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Runs an agent to completion and returns its structured result
///
/// Errors: `Agent` when the invocation fails or times out, `Protocol` when
/// it finishes but its output is not a valid result object.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentOutput>;
}

/// Runtime that spawns a CLI backend as a subprocess
pub struct CliRuntime {
    backend: Box<dyn Backend>,
    timeout: Duration,
}

impl std::fmt::Debug for CliRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliRuntime")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CliRuntime {
    pub fn new(backend: Box<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

#[async_trait]
impl AgentRuntime for CliRuntime {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentOutput> {
        info!(
            agent = %request.agent_name,
            backend = self.backend.name(),
            workdir = %request.workdir.display(),
            "Invoking agent"
        );

        let mut handle = self
            .backend
            .spawn(&request.prompt, &request.workdir, &request.env)
            .await?;

        let stdout = handle
            .child_mut()
            .stdout
            .take()
            .ok_or_else(|| Error::Agent("Agent stdout was not captured".to_string()))?;
        let stderr_task = handle.child_mut().stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut collector = CollectingHandler::new();
        let mut streamer = OutputStreamer::new(BufReader::new(stdout));
        // An agent may close stdout and keep running, so the deadline covers
        // the exit and stderr as well as the stream.
        let run = async {
            streamer.stream(&mut collector).await?;
            let status = handle.wait().await?;
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            Ok::<_, Error>((status, stderr))
        };

        let (status, stderr) = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(agent = %request.agent_name, timeout = ?self.timeout, "Agent timed out, killing it");
                if let Err(e) = handle.kill().await {
                    warn!(agent = %request.agent_name, error = %e, "Failed to kill agent");
                }
                persist_transcript(request, &collector).await;
                return Err(Error::Agent(format!(
                    "{} timed out after {:?}",
                    request.agent_name, self.timeout
                )));
            }
        };

        persist_transcript(request, &collector).await;

        if !status.success() || collector.is_error {
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::Agent(format!(
                "{} failed ({}): {}",
                request.agent_name,
                status,
                if tail.is_empty() { collector.final_text().trim() } else { tail.trim() }
            )));
        }

        debug!(agent = %request.agent_name, lines = collector.raw_lines.len(), "Agent finished");
        AgentOutput::parse(collector.final_text())
    }
}

async fn persist_transcript(request: &AgentRequest, collector: &CollectingHandler) {
    let Some(dir) = &request.log_dir else {
        return;
    };
    let path = dir.join(RAW_OUTPUT_FILE);
    let write = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, collector.transcript()).await
    };
    if let Err(e) = write.await {
        warn!(path = %path.display(), error = %e, "Failed to save agent transcript");
    }
}
