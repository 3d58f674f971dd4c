//! Repository modules for database operations

pub mod dependencies;
pub mod issues;

pub use dependencies::DependencyRepository;
pub use issues::IssueRepository;
