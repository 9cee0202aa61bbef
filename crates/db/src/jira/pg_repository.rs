use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::jira::models::{DbIssue, DbProject, IssueRecord, PushSummary, StatusChange};
use crate::jira::repositories::IssueStore;
use analyzer_common::error::{AnalyzerError, AnalyzerResult};

#[derive(Clone)]
pub struct PgJiraRepository {
    pool: PgPool,
}

/// Ids resolved earlier in the same transaction, keyed by natural key.
#[derive(Default)]
struct ResolvedIds {
    projects: HashMap<String, i32>,
    authors: HashMap<String, i32>,
}

impl PgJiraRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert the project or refresh its key/url, returning the row id.
    async fn resolve_project(
        tx: &mut Transaction<'_, Postgres>,
        ids: &mut ResolvedIds,
        project: &DbProject,
    ) -> AnalyzerResult<i32> {
        if let Some(id) = ids.projects.get(&project.title) {
            return Ok(*id);
        }

        let id: i32 = sqlx::query_scalar(
            "insert into projects (title, key, url)
             values ($1, $2, $3)
             on conflict (title) do update set
               key = excluded.key,
               url = excluded.url
             returning id",
        )
        .bind(&project.title)
        .bind(&project.key)
        .bind(&project.url)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AnalyzerError::Database(format!("resolve project {}: {e}", project.title)))?;

        ids.projects.insert(project.title.clone(), id);
        Ok(id)
    }

    /// Look up an author by name, inserting it when absent.
    ///
    /// `on conflict do nothing` returns no row when a concurrent ingestion
    /// created the author first; the follow-up select picks up that row.
    async fn resolve_author(
        tx: &mut Transaction<'_, Postgres>,
        ids: &mut ResolvedIds,
        name: &str,
    ) -> AnalyzerResult<i32> {
        if let Some(id) = ids.authors.get(name) {
            return Ok(*id);
        }

        let inserted: Option<i32> = sqlx::query_scalar(
            "insert into author (name) values ($1)
             on conflict (name) do nothing
             returning id",
        )
        .bind(name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AnalyzerError::Database(format!("insert author {name}: {e}")))?;

        let id = match inserted {
            Some(id) => id,
            None => sqlx::query_scalar("select id from author where name = $1")
                .bind(name)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| AnalyzerError::Database(format!("select author {name}: {e}")))?,
        };

        ids.authors.insert(name.to_string(), id);
        Ok(id)
    }

    /// Upsert an issue by key; every mutable column is overwritten, the id is kept.
    async fn upsert_issue(
        tx: &mut Transaction<'_, Postgres>,
        issue: &DbIssue,
        project_id: i32,
        author_id: i32,
        assignee_id: Option<i32>,
    ) -> AnalyzerResult<i32> {
        sqlx::query_scalar(
            "insert into issue
             (projectId, authorId, assigneeId, key, summary, description, type, priority, status,
              createdTime, closedTime, updatedTime, timeSpent)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             on conflict (key) do update set
               projectId = excluded.projectId,
               authorId = excluded.authorId,
               assigneeId = excluded.assigneeId,
               summary = excluded.summary,
               description = excluded.description,
               type = excluded.type,
               priority = excluded.priority,
               status = excluded.status,
               createdTime = excluded.createdTime,
               closedTime = excluded.closedTime,
               updatedTime = excluded.updatedTime,
               timeSpent = excluded.timeSpent
             returning id",
        )
        .bind(project_id)
        .bind(author_id)
        .bind(assignee_id)
        .bind(&issue.key)
        .bind(&issue.summary)
        .bind(&issue.description)
        .bind(&issue.issue_type)
        .bind(&issue.priority)
        .bind(&issue.status)
        .bind(issue.created_time)
        .bind(issue.closed_time)
        .bind(issue.updated_time)
        .bind(issue.time_spent)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AnalyzerError::Database(format!("upsert issue {}: {e}", issue.key)))
    }

    async fn has_status_change(
        tx: &mut Transaction<'_, Postgres>,
        issue_id: i32,
        change_time: DateTime<Utc>,
    ) -> AnalyzerResult<bool> {
        sqlx::query_scalar(
            "select exists(select 1 from statuschanges where issueId = $1 and changeTime = $2)",
        )
        .bind(issue_id)
        .bind(change_time)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AnalyzerError::Database(e.to_string()))
    }

    /// Insert a status change unless one is already recorded for
    /// (issue, change time). Returns `false` when the change was skipped.
    async fn insert_status_change(
        tx: &mut Transaction<'_, Postgres>,
        ids: &mut ResolvedIds,
        issue_id: i32,
        author: &str,
        change: &StatusChange,
    ) -> AnalyzerResult<bool> {
        if Self::has_status_change(tx, issue_id, change.change_time).await? {
            tracing::debug!(issue_id, change_time = %change.change_time, "status change already recorded");
            return Ok(false);
        }

        let author_id = Self::resolve_author(tx, ids, author).await?;

        let result = sqlx::query(
            "insert into statuschanges (issueId, authorId, changeTime, fromStatus, toStatus)
             values ($1, $2, $3, $4, $5)
             on conflict (issueId, changeTime) do nothing",
        )
        .bind(issue_id)
        .bind(author_id)
        .bind(change.change_time)
        .bind(&change.from_status)
        .bind(&change.to_status)
        .execute(&mut **tx)
        .await
        .map_err(|e| AnalyzerError::Database(format!("insert status change for issue {issue_id}: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn push_record(
        tx: &mut Transaction<'_, Postgres>,
        ids: &mut ResolvedIds,
        record: &IssueRecord,
        summary: &mut PushSummary,
    ) -> AnalyzerResult<()> {
        let project_id = Self::resolve_project(tx, ids, &record.project).await?;
        let author_id = Self::resolve_author(tx, ids, &record.author).await?;
        let assignee_id = match record.assignee.as_deref() {
            Some(name) => Some(Self::resolve_author(tx, ids, name).await?),
            None => None,
        };

        let issue_id =
            Self::upsert_issue(tx, &record.issue, project_id, author_id, assignee_id).await?;
        summary.issues += 1;

        for (author, change) in &record.status_changes {
            if Self::insert_status_change(tx, ids, issue_id, author, change).await? {
                summary.status_changes_inserted += 1;
            } else {
                summary.status_changes_skipped += 1;
            }
        }

        Ok(())
    }

    async fn push_all(
        tx: &mut Transaction<'_, Postgres>,
        project: &DbProject,
        records: &[IssueRecord],
    ) -> AnalyzerResult<PushSummary> {
        let mut ids = ResolvedIds::default();
        let mut summary = PushSummary::default();

        Self::resolve_project(tx, &mut ids, project).await?;

        // Concurrent pushes lock author rows in one global (sorted) order,
        // so overlapping authors can make them wait but never deadlock.
        for name in author_names(records) {
            Self::resolve_author(tx, &mut ids, name).await?;
        }

        for record in records {
            Self::push_record(tx, &mut ids, record, &mut summary).await?;
        }

        Ok(summary)
    }

    // ── Read helpers ─────────────────────────────────────────────

    pub async fn issue_id_by_key(&self, key: &str) -> AnalyzerResult<Option<i32>> {
        sqlx::query_scalar("select id from issue where key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AnalyzerError::Database(e.to_string()))
    }

    pub async fn count_issues_for_project(&self, title: &str) -> AnalyzerResult<i64> {
        sqlx::query_scalar(
            "select count(*) from issue i
             join projects p on p.id = i.projectId
             where p.title = $1",
        )
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AnalyzerError::Database(e.to_string()))
    }

    pub async fn count_status_changes_for_issue(&self, key: &str) -> AnalyzerResult<i64> {
        sqlx::query_scalar(
            "select count(*) from statuschanges s
             join issue i on i.id = s.issueId
             where i.key = $1",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AnalyzerError::Database(e.to_string()))
    }

    pub async fn project_by_title(&self, title: &str) -> AnalyzerResult<Option<(i32, DbProject)>> {
        let row: Option<(i32, String, String, String)> =
            sqlx::query_as("select id, title, key, url from projects where title = $1")
                .bind(title)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AnalyzerError::Database(e.to_string()))?;

        Ok(row.map(|(id, title, key, url)| (id, DbProject { title, key, url })))
    }
}

/// Every author, assignee and status-change author named by `records`, sorted.
fn author_names(records: &[IssueRecord]) -> BTreeSet<&str> {
    let mut names = BTreeSet::new();
    for record in records {
        names.insert(record.author.as_str());
        if let Some(assignee) = record.assignee.as_deref() {
            names.insert(assignee);
        }
        names.extend(record.status_changes.keys().map(String::as_str));
    }
    names
}

#[async_trait]
impl IssueStore for PgJiraRepository {
    async fn push_issues(
        &self,
        project: &DbProject,
        records: &[IssueRecord],
    ) -> AnalyzerResult<PushSummary> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AnalyzerError::Database(e.to_string()))?;

        match Self::push_all(&mut tx, project, records).await {
            Ok(summary) => {
                tx.commit()
                    .await
                    .map_err(|e| AnalyzerError::Database(e.to_string()))?;
                tracing::info!(
                    project = %project.title,
                    issues = summary.issues,
                    inserted = summary.status_changes_inserted,
                    skipped = summary.status_changes_skipped,
                    "pushed project issues"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(project = %project.title, error = %e, "push failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
