use analyzer_common::error::AnalyzerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::jira::client::JiraClientError;
use crate::service::IngestError;

pub struct ApiError(pub AnalyzerError);

impl From<AnalyzerError> for ApiError {
    fn from(err: AnalyzerError) -> Self {
        Self(err)
    }
}

/// Ingestion failures are logged in full; the client only sees which phase failed.
impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        tracing::error!(error = %err, "project ingestion failed");
        let mapped = match err {
            IngestError::ProjectNotFound(key) => {
                AnalyzerError::NotFound(format!("project {key} not found"))
            }
            IngestError::Fetch(_) => {
                AnalyzerError::Upstream("failed to get project issues".to_owned())
            }
            IngestError::Persist(_) => {
                AnalyzerError::Internal("failed to save project issues".to_owned())
            }
        };
        Self(mapped)
    }
}

impl From<JiraClientError> for ApiError {
    fn from(err: JiraClientError) -> Self {
        tracing::error!(error = %err, "remote tracker request failed");
        let mapped = match err {
            JiraClientError::NotFound { .. } => AnalyzerError::NotFound("resource not found".to_owned()),
            _ => AnalyzerError::Upstream("failed to get projects page".to_owned()),
        };
        Self(mapped)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            AnalyzerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AnalyzerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AnalyzerError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AnalyzerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
