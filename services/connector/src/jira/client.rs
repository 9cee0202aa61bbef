use std::time::Duration;

use analyzer_common::error::AnalyzerResult;
use analyzer_config::{get_var, parse_var_or};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::fetcher::IssueBatchSource;
use super::models::{JiraIssue, JiraProject, JiraSearchResponse, PageInfo, ResponseProject};
use super::retry::Backoff;

#[derive(Debug, Clone)]
pub struct JiraClientConfig {
    pub base_url: String,
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub thread_count: usize,
    pub issues_per_request: usize,
    pub min_sleep: Duration,
    pub max_sleep: Duration,
    pub timeout_secs: u64,
}

impl JiraClientConfig {
    /// Load remote tracker settings from the environment.
    ///
    /// `JIRA_BASE_URL` is required. Credentials are optional and only used
    /// when both `JIRA_EMAIL` and `JIRA_API_TOKEN` are present.
    pub fn from_env() -> AnalyzerResult<Self> {
        let base_url = get_var("JIRA_BASE_URL")?
            .trim()
            .trim_end_matches('/')
            .to_owned();

        let min_sleep_ms: u64 = parse_var_or("JIRA_MIN_SLEEP_MS", 100)?;
        let max_sleep_ms: u64 = parse_var_or("JIRA_MAX_SLEEP_MS", 10_000)?;

        Ok(Self {
            base_url,
            email: std::env::var("JIRA_EMAIL").ok().filter(|v| !v.is_empty()),
            api_token: std::env::var("JIRA_API_TOKEN").ok().filter(|v| !v.is_empty()),
            thread_count: parse_var_or::<usize>("JIRA_THREAD_COUNT", 5)?.max(1),
            issues_per_request: parse_var_or::<usize>("JIRA_ISSUES_PER_REQUEST", 50)?.max(1),
            min_sleep: Duration::from_millis(min_sleep_ms.max(1)),
            max_sleep: Duration::from_millis(max_sleep_ms),
            timeout_secs: parse_var_or("JIRA_TIMEOUT_SECS", 30)?,
        })
    }
}

#[derive(Clone)]
pub struct JiraClient {
    client: Client,
    config: JiraClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum JiraClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("resource not found (HTTP {status}): {url}")]
    NotFound { status: StatusCode, url: String },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("fetch worker failed: {0}")]
    Worker(String),
}

impl JiraClient {
    pub fn new(config: JiraClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn config(&self) -> &JiraClientConfig {
        &self.config
    }

    /// Fetch the full project list in one call.
    pub async fn list_all_projects(&self) -> Result<Vec<JiraProject>, JiraClientError> {
        let projects: Vec<JiraProject> = self
            .request_with_retry("/rest/api/2/project", &[], &CancellationToken::new())
            .await?;
        tracing::info!(count = projects.len(), "fetched project list");
        Ok(projects)
    }

    /// One page of the project list, filtered by a case-insensitive name match.
    pub async fn list_projects_page(
        &self,
        search: &str,
        limit: usize,
        page: usize,
    ) -> Result<ResponseProject, JiraClientError> {
        let projects = self.list_all_projects().await?;
        Ok(paginate_projects(projects, search, limit, page))
    }

    pub async fn get_project_by_key(&self, key: &str) -> Result<JiraProject, JiraClientError> {
        let path = format!("/rest/api/2/project/{key}");
        self.request_with_retry(&path, &[], &CancellationToken::new())
            .await
    }

    /// GET `path` under the base URL and decode the body as `T`.
    ///
    /// Any status other than success or 404/400 is retried on the
    /// [`Backoff`] schedule. Network failures are retried the same way.
    /// Cancellation is observed before each attempt and during each sleep;
    /// a request already sent is allowed to finish.
    async fn request_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, JiraClientError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut backoff = Backoff::new(self.config.min_sleep, self.config.max_sleep);
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(JiraClientError::Cancelled);
            }
            attempts += 1;

            let mut request = self.client.get(&url).query(query);
            if let (Some(email), Some(token)) = (&self.config.email, &self.config.api_token) {
                request = request.basic_auth(email, Some(token));
            }

            let last_error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match decode_body(&url, response.bytes().await) {
                            Ok(value) => return value,
                            Err(read_error) => read_error,
                        }
                    } else if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
                        return Err(JiraClientError::NotFound { status, url });
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        format!("{status}: {body}")
                    }
                }
                Err(e) if e.is_builder() => return Err(JiraClientError::Transport(e)),
                Err(e) => e.to_string(),
            };

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(%url, attempts, %last_error, "giving up on request");
                return Err(JiraClientError::RetryExhausted {
                    attempts,
                    last_error,
                });
            };

            tracing::warn!(
                %url,
                attempts,
                delay_ms = delay.as_millis() as u64,
                %last_error,
                "retrying after backoff"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(JiraClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Decode a success body. The outer `Err` is a failed body read, which the
/// caller retries like any other transport failure; a body that arrived but
/// does not parse is a final `Decode` error.
fn decode_body<T, B>(
    url: &str,
    body: Result<B, reqwest::Error>,
) -> Result<Result<T, JiraClientError>, String>
where
    T: DeserializeOwned,
    B: AsRef<[u8]>,
{
    let body = body.map_err(|e| format!("failed to read response body: {e}"))?;
    Ok(
        serde_json::from_slice(body.as_ref()).map_err(|e| JiraClientError::Decode {
            url: url.to_owned(),
            message: e.to_string(),
        }),
    )
}

#[async_trait]
impl IssueBatchSource for JiraClient {
    async fn count_issues(
        &self,
        project_key: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, JiraClientError> {
        let query = [
            ("jql", format!("project={project_key}")),
            ("maxResults", "0".to_owned()),
        ];
        let response: JiraSearchResponse = self
            .request_with_retry("/rest/api/2/search", &query, cancel)
            .await?;
        tracing::debug!(project = project_key, total = response.total, "counted issues");
        Ok(response.total)
    }

    async fn fetch_issue_batch(
        &self,
        project_key: &str,
        start_at: usize,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<JiraIssue>, JiraClientError> {
        let query = [
            ("jql", format!("project={project_key}")),
            ("expand", "changelog".to_owned()),
            ("startAt", start_at.to_string()),
            ("maxResults", batch_size.to_string()),
        ];
        let response: JiraSearchResponse = self
            .request_with_retry("/rest/api/2/search", &query, cancel)
            .await?;
        Ok(response.issues)
    }
}

/// Filter `projects` by name and cut out page `page` (1-based) of size `limit`.
///
/// A page past the end yields no projects but still reports the totals.
pub fn paginate_projects(
    projects: Vec<JiraProject>,
    search: &str,
    limit: usize,
    page: usize,
) -> ResponseProject {
    let limit = limit.max(1);
    let page = page.max(1);
    let needle = search.trim().to_lowercase();

    let matching: Vec<JiraProject> = projects
        .into_iter()
        .filter(|p| needle.is_empty() || p.name.to_lowercase().contains(&needle))
        .collect();

    let total = matching.len();
    let start = (page - 1).saturating_mul(limit);
    let projects = matching.into_iter().skip(start).take(limit).collect();

    ResponseProject {
        projects,
        page_info: PageInfo {
            page_count: total.div_ceil(limit),
            current_page: page,
            projects_count: total,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn test_config() -> JiraClientConfig {
        JiraClientConfig {
            base_url: "http://localhost".to_string(),
            email: None,
            api_token: None,
            thread_count: 2,
            issues_per_request: 2,
            min_sleep: Duration::from_millis(5),
            max_sleep: Duration::from_millis(40),
            timeout_secs: 5,
        }
    }

    fn test_client(server: &MockServer) -> JiraClient {
        JiraClient::new(test_config())
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn make_projects(names: &[&str]) -> Vec<JiraProject> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| JiraProject {
                id: (10_000 + i).to_string(),
                key: format!("P{i}"),
                name: (*name).to_string(),
                url: String::new(),
            })
            .collect()
    }

    fn issue_json(key: &str) -> serde_json::Value {
        serde_json::json!({ "key": key, "fields": { "summary": format!("summary of {key}") } })
    }

    #[tokio::test]
    async fn list_all_projects_decodes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "10000", "key": "DEMO", "name": "Demo Project", "self": "http://jira/rest/api/2/project/10000" },
                { "id": "10001", "key": "OPS", "name": "Operations" }
            ])))
            .mount(&server)
            .await;

        let projects = test_client(&server).list_all_projects().await.unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].key, "DEMO");
        assert_eq!(projects[0].url, "http://jira/rest/api/2/project/10000");
        assert_eq!(projects[1].url, "");
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project"))
            .respond_with(ResponseTemplate::new(500).set_body_string("busy"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let projects = test_client(&server).list_all_projects().await.unwrap();
        assert!(projects.is_empty());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3, "two failures and one success");
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.min_sleep = Duration::from_millis(10);
        config.max_sleep = Duration::from_millis(40);
        let client = JiraClient::new(config)
            .unwrap()
            .with_base_url(&server.uri());

        // sleeps of 10, 20 and 40 ms fit the budget; the fourth failure gives up
        let err = client.list_all_projects().await.unwrap_err();
        match err {
            JiraClientError::RetryExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("503"), "got: {last_error}");
            }
            other => panic!("expected RetryExhausted, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project/NOPE"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .get_project_by_key("NOPE")
            .await
            .unwrap_err();
        assert!(
            matches!(err, JiraClientError::NotFound { status, .. } if status == StatusCode::NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .count_issues("GONE", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JiraClientError::NotFound { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server).list_all_projects().await.unwrap_err();
        assert!(matches!(err, JiraClientError::Decode { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn body_read_failure_is_retryable() {
        let read_error = Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();

        let outcome = decode_body::<Vec<JiraProject>, Vec<u8>>("http://jira/x", Err(read_error));
        let message = outcome.unwrap_err();
        assert!(message.starts_with("failed to read response body"), "got: {message}");
    }

    #[test]
    fn decode_body_separates_parse_errors() {
        let parsed = decode_body::<Vec<JiraProject>, _>("http://jira/x", Ok(b"[]".to_vec()))
            .expect("body was read");
        assert!(parsed.unwrap().is_empty());

        let garbage = decode_body::<Vec<JiraProject>, _>("http://jira/x", Ok(b"<html>".to_vec()))
            .expect("body was read");
        assert!(matches!(garbage, Err(JiraClientError::Decode { .. })));
    }

    #[tokio::test]
    async fn count_issues_requests_zero_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("jql", "project=DEMO"))
            .and(query_param("maxResults", "0"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "total": 3 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let total = test_client(&server)
            .count_issues("DEMO", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn fetch_issue_batch_sends_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("jql", "project=DEMO"))
            .and(query_param("expand", "changelog"))
            .and(query_param("startAt", "2"))
            .and(query_param("maxResults", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 3,
                "issues": [issue_json("DEMO-3")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let issues = test_client(&server)
            .fetch_issue_batch("DEMO", 2, 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].key, "DEMO-3");
    }

    #[tokio::test]
    async fn cancelled_token_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = test_client(&server)
            .count_issues("DEMO", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JiraClientError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.min_sleep = Duration::from_secs(30);
        config.max_sleep = Duration::from_secs(60);
        let client = JiraClient::new(config)
            .unwrap()
            .with_base_url(&server.uri());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            client.fetch_issue_batch("DEMO", 0, 2, &cancel),
        )
        .await
        .expect("cancellation should end the backoff sleep")
        .unwrap_err();
        assert!(matches!(err, JiraClientError::Cancelled));
    }

    #[tokio::test]
    async fn uses_basic_auth_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config();
        config.email = Some("bot@example.com".to_string());
        config.api_token = Some("token".to_string());
        let client = JiraClient::new(config)
            .unwrap()
            .with_base_url(&server.uri());

        client.list_all_projects().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_host_exhausts_retries() {
        let mut config = test_config();
        config.base_url = "http://127.0.0.1:1".to_string();
        config.max_sleep = Duration::from_millis(10);
        let client = JiraClient::new(config).unwrap();

        let err = client.list_all_projects().await.unwrap_err();
        assert!(matches!(err, JiraClientError::RetryExhausted { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn list_projects_page_filters_remote_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_projects(&[
                "Alpha Web",
                "Beta",
                "alpha mobile",
            ])))
            .mount(&server)
            .await;

        let page = test_client(&server)
            .list_projects_page("ALPHA", 1, 2)
            .await
            .unwrap();
        assert_eq!(page.projects.len(), 1);
        assert_eq!(page.projects[0].name, "alpha mobile");
        assert_eq!(page.page_info.projects_count, 2);
        assert_eq!(page.page_info.page_count, 2);
        assert_eq!(page.page_info.current_page, 2);
    }

    #[test]
    fn paginate_past_end_keeps_totals() {
        let page = paginate_projects(make_projects(&["a", "b", "c"]), "", 2, 5);
        assert!(page.projects.is_empty());
        assert_eq!(page.page_info.projects_count, 3);
        assert_eq!(page.page_info.page_count, 2);
    }

    #[test]
    fn paginate_empty_list() {
        let page = paginate_projects(Vec::new(), "x", 20, 1);
        assert!(page.projects.is_empty());
        assert_eq!(page.page_info.page_count, 0);
    }

    #[test]
    fn config_from_env_reads_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        std::env::set_var("JIRA_BASE_URL", "https://jira.example.com/");
        for key in [
            "JIRA_EMAIL",
            "JIRA_API_TOKEN",
            "JIRA_THREAD_COUNT",
            "JIRA_ISSUES_PER_REQUEST",
            "JIRA_MIN_SLEEP_MS",
            "JIRA_MAX_SLEEP_MS",
        ] {
            std::env::remove_var(key);
        }

        let cfg = JiraClientConfig::from_env().expect("should parse");
        assert_eq!(cfg.base_url, "https://jira.example.com");
        assert_eq!(cfg.thread_count, 5);
        assert_eq!(cfg.issues_per_request, 50);
        assert_eq!(cfg.min_sleep, Duration::from_millis(100));
        assert_eq!(cfg.max_sleep, Duration::from_millis(10_000));
        assert!(cfg.email.is_none());

        std::env::remove_var("JIRA_BASE_URL");
    }

    #[test]
    fn config_from_env_requires_base_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        std::env::remove_var("JIRA_BASE_URL");
        assert!(JiraClientConfig::from_env().is_err());
    }

    #[test]
    fn config_from_env_clamps_thread_count() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        std::env::set_var("JIRA_BASE_URL", "https://jira.example.com");
        std::env::set_var("JIRA_THREAD_COUNT", "0");
        let cfg = JiraClientConfig::from_env().expect("should parse");
        assert_eq!(cfg.thread_count, 1);

        std::env::remove_var("JIRA_THREAD_COUNT");
        std::env::remove_var("JIRA_BASE_URL");
    }
}
