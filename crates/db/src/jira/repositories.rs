use async_trait::async_trait;

use crate::jira::models::{DbProject, IssueRecord, PushSummary};
use analyzer_common::error::AnalyzerResult;

#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Persist one project's issues in a single transaction.
    ///
    /// The project row is created (or its key/url refreshed) even when
    /// `records` is empty. Any failure rolls back the whole batch.
    async fn push_issues(
        &self,
        project: &DbProject,
        records: &[IssueRecord],
    ) -> AnalyzerResult<PushSummary>;
}
