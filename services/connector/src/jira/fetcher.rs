use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::client::JiraClientError;
use super::models::JiraIssue;

/// Paged access to a project's issues on the remote tracker.
#[async_trait]
pub trait IssueBatchSource: Send + Sync + 'static {
    async fn count_issues(
        &self,
        project_key: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, JiraClientError>;

    async fn fetch_issue_batch(
        &self,
        project_key: &str,
        start_at: usize,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<JiraIssue>, JiraClientError>;
}

/// Fetches every issue of a project over a fixed number of parallel lanes.
///
/// Lane `i` owns offsets `i * batch`, `(i + threads) * batch`, ... so the
/// lanes tile `[0, total)` without overlap. The first lane failure cancels
/// the rest and the whole fetch fails; partial results are never returned.
pub struct ConcurrentFetcher<S> {
    source: Arc<S>,
    thread_count: usize,
    batch_size: usize,
}

struct LaneFailure {
    lane: usize,
    error: JiraClientError,
}

impl<S: IssueBatchSource> ConcurrentFetcher<S> {
    pub fn new(source: Arc<S>, thread_count: usize, batch_size: usize) -> Self {
        Self {
            source,
            thread_count: thread_count.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub async fn fetch_project_issues(
        &self,
        project_key: &str,
    ) -> Result<Vec<JiraIssue>, JiraClientError> {
        let cancel = CancellationToken::new();
        let total = self.source.count_issues(project_key, &cancel).await?;
        if total == 0 {
            tracing::info!(project = project_key, "project has no issues");
            return Ok(Vec::new());
        }

        let stride = self.thread_count * self.batch_size;
        let mut lanes = JoinSet::new();

        for lane in 0..self.thread_count {
            let first = lane * self.batch_size;
            if first >= total {
                break;
            }
            let source = Arc::clone(&self.source);
            let key = project_key.to_owned();
            let batch_size = self.batch_size;
            let lane_cancel = cancel.clone();
            lanes.spawn(async move {
                let result =
                    run_lane(source, key, first, stride, total, batch_size, lane_cancel).await;
                (lane, result)
            });
        }

        tracing::info!(
            project = project_key,
            total,
            lanes = lanes.len(),
            batch_size = self.batch_size,
            "fetching issues"
        );

        let mut fetched: Vec<(usize, Vec<JiraIssue>)> = Vec::with_capacity(lanes.len());
        let mut failures: Vec<LaneFailure> = Vec::new();

        while let Some(joined) = lanes.join_next().await {
            match joined {
                Ok((lane, Ok(issues))) => fetched.push((lane, issues)),
                Ok((lane, Err(error))) => {
                    cancel.cancel();
                    failures.push(LaneFailure { lane, error });
                }
                Err(join_error) => {
                    cancel.cancel();
                    tracing::error!(project = project_key, error = %join_error, "fetch lane aborted");
                    failures.push(LaneFailure {
                        lane: usize::MAX,
                        error: JiraClientError::Worker(join_error.to_string()),
                    });
                }
            }
        }

        if let Some(error) = pick_failure(project_key, failures) {
            return Err(error);
        }

        fetched.sort_by_key(|(lane, _)| *lane);
        let issues: Vec<JiraIssue> = fetched.into_iter().flat_map(|(_, issues)| issues).collect();
        tracing::info!(project = project_key, fetched = issues.len(), total, "fetched issues");
        Ok(issues)
    }
}

async fn run_lane<S: IssueBatchSource>(
    source: Arc<S>,
    project_key: String,
    mut start_at: usize,
    stride: usize,
    total: usize,
    batch_size: usize,
    cancel: CancellationToken,
) -> Result<Vec<JiraIssue>, JiraClientError> {
    let mut issues = Vec::new();
    while start_at < total {
        if cancel.is_cancelled() {
            return Err(JiraClientError::Cancelled);
        }
        let batch = match source
            .fetch_issue_batch(&project_key, start_at, batch_size, &cancel)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };
        if batch.is_empty() {
            tracing::debug!(project = %project_key, start_at, "empty batch, lane done");
            break;
        }
        issues.extend(batch);
        start_at += stride;
    }
    Ok(issues)
}

/// Choose the error to report: the lowest lane with a real failure wins,
/// `Cancelled` only when nothing else failed. The rest are logged.
fn pick_failure(project_key: &str, mut failures: Vec<LaneFailure>) -> Option<JiraClientError> {
    failures.sort_by_key(|f| (matches!(f.error, JiraClientError::Cancelled), f.lane));
    let mut failures = failures.into_iter();
    let chosen = failures.next()?;
    for other in failures {
        if !matches!(other.error, JiraClientError::Cancelled) {
            tracing::warn!(project = project_key, lane = other.lane, error = %other.error, "additional lane failure");
        }
    }
    tracing::error!(project = project_key, lane = chosen.lane, error = %chosen.error, "issue fetch failed");
    Some(chosen.error)
}
