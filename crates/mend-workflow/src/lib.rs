pub mod prompt;
pub mod service;
pub mod source;

pub use service::{WorkflowCommand, WorkflowError, WorkflowService};
pub use source::{IssueSource, SourceError, SourceIssue, StaticSource};
