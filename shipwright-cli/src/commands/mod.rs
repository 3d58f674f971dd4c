//! CLI command implementations

pub mod context;
pub mod issues;
pub mod pipeline;
pub mod runs;

pub use context::Context;
pub use issues::IssueArgs;
pub use pipeline::{PhaseArgs, ResumeArgs, StartArgs};
pub use runs::{AbortArgs, ReclaimArgs, ShowArgs};
