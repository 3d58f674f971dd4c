//! Error types for GitHub operations

use thiserror::Error;

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during GitHub operations
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub API error
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    /// Authentication error
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// Issue not found
    #[error("Issue #{0} not found")]
    IssueNotFound(u64),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<Error> for shipwright_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::IssueNotFound(number) => {
                shipwright_core::Error::NotFound(format!("issue #{}", number))
            }
            Error::Auth(msg) => shipwright_core::Error::Config(format!("GitHub: {}", msg)),
            other => shipwright_core::Error::Tracker(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let err: shipwright_core::Error = Error::IssueNotFound(7).into();
        assert!(matches!(err, shipwright_core::Error::NotFound(_)));

        let err: shipwright_core::Error = Error::Auth("no token".to_string()).into();
        assert!(matches!(err, shipwright_core::Error::Config(_)));

        let err: shipwright_core::Error = Error::Parse("bad".to_string()).into();
        assert!(matches!(err, shipwright_core::Error::Tracker(_)));
    }
}
