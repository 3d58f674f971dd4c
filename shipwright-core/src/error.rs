//! Error types for Shipwright
//!
//! Every component returns these typed errors; only the orchestrator decides
//! whether a failure is retried, aborts the run, or is surfaced to the operator.

use thiserror::Error;

/// Result type alias for Shipwright operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Shipwright operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Git error
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Bad template, flags or configuration. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No free port pair or workspace slot
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Agent invocation failed or timed out
    #[error("Agent error: {0}")]
    Agent(String),

    /// Agent output could not be parsed into a structured result
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Persisted state was written by an incompatible schema version
    #[error("Schema mismatch: found version {found}, expected {expected}")]
    SchemaMismatch { found: u64, expected: u32 },

    /// Workspace three-way consistency check failed
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Review left blocking findings that were not fixed
    #[error("Unresolved review findings: {0}")]
    Unresolved(String),

    /// Stopped by an operator
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Another orchestrator owns the run
    #[error("Run {0} is owned by another orchestrator")]
    LeaseHeld(String),

    /// Issue tracker backend failure
    #[error("Issue tracker error: {0}")]
    Tracker(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Classification of an error for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    ResourceExhausted,
    Agent,
    Protocol,
    SchemaMismatch,
    Consistency,
    NotFound,
    Unresolved,
    Aborted,
    Internal,
}

impl ErrorKind {
    /// Whether an error of this kind may be retried by the orchestrator
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ResourceExhausted | ErrorKind::Agent | ErrorKind::Protocol
        )
    }

    /// Whether a phase failing with this kind should be retried under the
    /// phase retry policy (protocol errors count as agent errors)
    pub fn is_agent_failure(&self) -> bool {
        matches!(self, ErrorKind::Agent | ErrorKind::Protocol)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Agent => "agent",
            ErrorKind::Protocol => "protocol",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::Consistency => "consistency",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unresolved => "unresolved",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::Agent(_) => ErrorKind::Agent,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Error::Consistency(_) => ErrorKind::Consistency,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unresolved(_) => ErrorKind::Unresolved,
            Error::Aborted(_) => ErrorKind::Aborted,
            Error::Io(_)
            | Error::Json(_)
            | Error::Git(_)
            | Error::LeaseHeld(_)
            | Error::Tracker(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the orchestrator may retry after this error
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Config);
        assert_eq!(Error::Agent("x".into()).kind(), ErrorKind::Agent);
        assert_eq!(Error::Protocol("x".into()).kind(), ErrorKind::Protocol);
        assert_eq!(
            Error::SchemaMismatch {
                found: 9,
                expected: 1
            }
            .kind(),
            ErrorKind::SchemaMismatch
        );
        assert_eq!(Error::Other("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Agent("timeout".into()).is_retryable());
        assert!(Error::Protocol("bad json".into()).is_retryable());
        assert!(Error::ResourceExhausted("ports".into()).is_retryable());
        assert!(!Error::Config("bad template".into()).is_retryable());
        assert!(!Error::Unresolved("2 blocking".into()).is_retryable());
        assert!(!Error::Aborted("operator".into()).is_retryable());
        assert!(!Error::SchemaMismatch {
            found: 2,
            expected: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_protocol_counts_as_agent_failure() {
        assert!(ErrorKind::Protocol.is_agent_failure());
        assert!(ErrorKind::Agent.is_agent_failure());
        assert!(!ErrorKind::Config.is_agent_failure());
    }

    #[test]
    fn test_schema_mismatch_message() {
        let err = Error::SchemaMismatch {
            found: 3,
            expected: 1,
        };
        assert_eq!(
            err.to_string(),
            "Schema mismatch: found version 3, expected 1"
        );
    }
}
