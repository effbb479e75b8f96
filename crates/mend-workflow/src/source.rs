//! Interface to the originating issue tracker.
//!
//! The real HTTP client lives outside this crate; the workflow only needs
//! the trait. Any source failure is treated uniformly as "refresh failed,
//! keep existing store state".

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// A freshly-fetched issue as the source reports it. `data` is opaque to
/// the workflow and the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIssue {
    pub id: String,
    pub project: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication with the issue source failed: {0}")]
    Auth(String),
    #[error("issue not found upstream: \"{0}\"")]
    NotFound(String),
    #[error("issue source rate limit hit")]
    RateLimit,
    #[error("network failure reaching the issue source: {0}")]
    Network(String),
    #[error("issue source API error: {0}")]
    Api(String),
}

#[async_trait::async_trait]
pub trait IssueSource: Send + Sync {
    async fn list_issues(&self) -> Result<Vec<SourceIssue>, SourceError>;
    async fn issue_detail(&self, id: &str) -> Result<SourceIssue, SourceError>;
}

/// Fixture-backed source for tests and offline runs: serves a fixed set of
/// issues, optionally loaded from a JSON file.
#[derive(Debug)]
pub struct StaticSource {
    issues: Mutex<Vec<SourceIssue>>,
}

impl StaticSource {
    pub fn new(issues: Vec<SourceIssue>) -> Self {
        Self {
            issues: Mutex::new(issues),
        }
    }

    /// Load `[{"id": ..., "project": ..., "data": {...}}, ...]` from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Api(format!("reading {}: {e}", path.display())))?;
        let issues: Vec<SourceIssue> = serde_json::from_str(&content)
            .map_err(|e| SourceError::Api(format!("parsing {}: {e}", path.display())))?;
        Ok(Self::new(issues))
    }

    /// Replace the served set, simulating upstream churn between refreshes.
    pub fn set_issues(&self, issues: Vec<SourceIssue>) {
        *self.issues.lock().unwrap() = issues;
    }
}

#[async_trait::async_trait]
impl IssueSource for StaticSource {
    async fn list_issues(&self) -> Result<Vec<SourceIssue>, SourceError> {
        Ok(self.issues.lock().unwrap().clone())
    }

    async fn issue_detail(&self, id: &str) -> Result<SourceIssue, SourceError> {
        self.issues
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<SourceIssue> {
        vec![SourceIssue {
            id: "42".into(),
            project: "web".into(),
            data: serde_json::json!({"title": "X"}),
        }]
    }

    #[tokio::test]
    async fn static_source_lists_and_finds() {
        let source = StaticSource::new(sample());
        assert_eq!(source.list_issues().await.unwrap().len(), 1);
        assert_eq!(source.issue_detail("42").await.unwrap().project, "web");
        assert!(matches!(
            source.issue_detail("nope").await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn loads_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.json");
        std::fs::write(
            &path,
            r#"[{"id": "1", "project": "api", "data": {"title": "boom"}}]"#,
        )
        .unwrap();
        let source = StaticSource::from_json_file(&path).unwrap();
        let issues = source.list_issues().await.unwrap();
        assert_eq!(issues[0].data["title"], "boom");
    }

    #[test]
    fn missing_fixture_is_an_api_error() {
        let err = StaticSource::from_json_file(Path::new("/nonexistent.json")).unwrap_err();
        assert!(matches!(err, SourceError::Api(_)));
    }
}
