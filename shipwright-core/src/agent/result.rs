//! Structured result returned by every agent invocation
//!
//! Agents finish with a JSON object:
//!
//! ```json
//! {"status": "success", "summary": "...", "artifacts": ["specs/x.md"], "payload": {}}
//! ```
//!
//! A fenced ```json block is preferred; otherwise the last top-level JSON
//! object in the text is used. Anything that does not match this shape is a
//! protocol error.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentOutput {
    pub status: AgentStatus,
    pub summary: String,
    /// Paths or references to things the agent produced
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Phase-specific data, validated by the phase that consumes it
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl AgentOutput {
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }

    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Success,
            summary: summary.into(),
            artifacts: Vec::new(),
            payload: serde_json::Map::new(),
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failure,
            ..Self::success(summary)
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Extract and validate the structured result from agent text
    pub fn parse(text: &str) -> Result<Self> {
        let value = extract_json(text).ok_or_else(|| {
            Error::Protocol(format!(
                "no JSON result object in agent output ({} chars)",
                text.len()
            ))
        })?;

        serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("agent result has the wrong shape: {}", e)))
    }

    /// Decode a payload field into a typed value
    pub fn payload_field<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.payload.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::Protocol(format!("payload field '{}' is invalid: {}", key, e))),
        }
    }
}

/// Last fenced json block that parses as an object, else the last top-level object
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let fenced = fenced_blocks(text)
        .into_iter()
        .rev()
        .find_map(|block| match serde_json::from_str::<serde_json::Value>(block.trim()) {
            Ok(value) if value.is_object() => Some(value),
            _ => None,
        });
    if fenced.is_some() {
        return fenced;
    }
    last_object(text)
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```json") {
        let after = &rest[start + "```json".len()..];
        match after.find("```") {
            Some(end) => {
                blocks.push(&after[..end]);
                rest = &after[end + 3..];
            }
            None => break,
        }
    }
    blocks
}

fn last_object(text: &str) -> Option<serde_json::Value> {
    let mut found = None;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() => {
                pos = start + stream.byte_offset();
                found = Some(value);
            }
            _ => pos = start + 1,
        }
    }

    found
}
