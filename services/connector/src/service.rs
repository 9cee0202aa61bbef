use analyzer_common::error::AnalyzerError;
use analyzer_db::jira::models::{DbProject, IssueRecord};
use analyzer_db::jira::repositories::IssueStore;
use async_trait::async_trait;
use serde::Serialize;

use crate::jira::client::{JiraClient, JiraClientError};
use crate::jira::fetcher::{ConcurrentFetcher, IssueBatchSource};
use crate::jira::models::{JiraIssue, JiraProject, ResponseProject};
use crate::jira::transform::DataTransformer;

/// Project metadata on the remote tracker.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn projects_page(
        &self,
        search: &str,
        limit: usize,
        page: usize,
    ) -> Result<ResponseProject, JiraClientError>;

    async fn project(&self, key: &str) -> Result<JiraProject, JiraClientError>;
}

#[async_trait]
pub trait IssueFetcher: Send + Sync {
    async fn fetch_project_issues(&self, key: &str) -> Result<Vec<JiraIssue>, JiraClientError>;
}

pub trait Transform: Send + Sync {
    fn project(&self, project: &JiraProject) -> DbProject;
    fn issue_set(&self, project: &JiraProject, issue: &JiraIssue) -> IssueRecord;
}

#[async_trait]
impl ProjectSource for JiraClient {
    async fn projects_page(
        &self,
        search: &str,
        limit: usize,
        page: usize,
    ) -> Result<ResponseProject, JiraClientError> {
        self.list_projects_page(search, limit, page).await
    }

    async fn project(&self, key: &str) -> Result<JiraProject, JiraClientError> {
        self.get_project_by_key(key).await
    }
}

#[async_trait]
impl<S: IssueBatchSource> IssueFetcher for ConcurrentFetcher<S> {
    async fn fetch_project_issues(&self, key: &str) -> Result<Vec<JiraIssue>, JiraClientError> {
        ConcurrentFetcher::fetch_project_issues(self, key).await
    }
}

impl Transform for DataTransformer {
    fn project(&self, project: &JiraProject) -> DbProject {
        self.transform_project(project)
    }

    fn issue_set(&self, project: &JiraProject, issue: &JiraIssue) -> IssueRecord {
        self.transform_issue_set(project, issue)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("failed to fetch project issues: {0}")]
    Fetch(#[source] JiraClientError),

    #[error("failed to save project issues: {0}")]
    Persist(#[source] AnalyzerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub project: String,
    pub issues: usize,
    pub status_changes_inserted: usize,
    pub status_changes_skipped: usize,
}

/// The two operations the HTTP layer needs.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn list_projects(
        &self,
        search: &str,
        limit: usize,
        page: usize,
    ) -> Result<ResponseProject, JiraClientError>;

    async fn ingest_project(&self, key: &str) -> Result<IngestReport, IngestError>;
}

/// Runs one project through fetch, transform and persist.
///
/// Persistence starts only after every issue has been fetched, so a fetch
/// failure never touches the store.
pub struct JiraService<S, F, T, P> {
    source: S,
    fetcher: F,
    transformer: T,
    store: P,
}

impl<S, F, T, P> JiraService<S, F, T, P>
where
    S: ProjectSource,
    F: IssueFetcher,
    T: Transform,
    P: IssueStore,
{
    pub fn new(source: S, fetcher: F, transformer: T, store: P) -> Self {
        Self {
            source,
            fetcher,
            transformer,
            store,
        }
    }

    pub fn transform_issues(&self, project: &JiraProject, issues: &[JiraIssue]) -> Vec<IssueRecord> {
        issues
            .iter()
            .map(|issue| self.transformer.issue_set(project, issue))
            .collect()
    }
}

fn fetch_error(key: &str, error: JiraClientError) -> IngestError {
    match error {
        JiraClientError::NotFound { .. } => IngestError::ProjectNotFound(key.to_owned()),
        other => IngestError::Fetch(other),
    }
}

#[async_trait]
impl<S, F, T, P> Connector for JiraService<S, F, T, P>
where
    S: ProjectSource + 'static,
    F: IssueFetcher + 'static,
    T: Transform + 'static,
    P: IssueStore + 'static,
{
    async fn list_projects(
        &self,
        search: &str,
        limit: usize,
        page: usize,
    ) -> Result<ResponseProject, JiraClientError> {
        tracing::info!(search, limit, page, "listing projects");
        self.source.projects_page(search, limit, page).await
    }

    async fn ingest_project(&self, key: &str) -> Result<IngestReport, IngestError> {
        let project = self
            .source
            .project(key)
            .await
            .map_err(|e| fetch_error(key, e))?;

        let issues = self
            .fetcher
            .fetch_project_issues(&project.key)
            .await
            .map_err(|e| fetch_error(key, e))?;

        let records = self.transform_issues(&project, &issues);
        let db_project = self.transformer.project(&project);
        tracing::debug!(project = %project.key, records = records.len(), "transformed issues");

        let summary = self
            .store
            .push_issues(&db_project, &records)
            .await
            .map_err(IngestError::Persist)?;

        tracing::info!(
            project = %project.key,
            issues = summary.issues,
            status_changes = summary.status_changes_inserted,
            "project ingested"
        );

        Ok(IngestReport {
            project: project.key,
            issues: summary.issues,
            status_changes_inserted: summary.status_changes_inserted,
            status_changes_skipped: summary.status_changes_skipped,
        })
    }
}
