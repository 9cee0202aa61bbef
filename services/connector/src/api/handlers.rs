use analyzer_common::error::AnalyzerError;
use axum::extract::{Query, State};
use axum::Json;

use crate::api::requests::{ProjectsQuery, UpdateProjectQuery};
use crate::api::responses::UpdateProjectResponse;
use crate::error::ApiError;
use crate::jira::models::ResponseProject;
use crate::service::Connector;
use crate::AppState;

const DEFAULT_LIMIT: usize = 20;
const DEFAULT_PAGE: usize = 1;

fn positive_param(name: &str, raw: Option<&str>, default: usize) -> Result<usize, AnalyzerError> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AnalyzerError::Validation(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}

pub async fn list_projects<C: Connector>(
    State(state): State<AppState<C>>,
    Query(query): Query<ProjectsQuery>,
) -> Result<Json<ResponseProject>, ApiError> {
    let limit = positive_param("limit", query.limit.as_deref(), DEFAULT_LIMIT)?;
    let page = positive_param("page", query.page.as_deref(), DEFAULT_PAGE)?;
    let search = query.search.unwrap_or_default();

    let projects = state.connector.list_projects(&search, limit, page).await?;
    tracing::info!(page, count = projects.projects.len(), "served projects page");
    Ok(Json(projects))
}

pub async fn update_project<C: Connector>(
    State(state): State<AppState<C>>,
    Query(query): Query<UpdateProjectQuery>,
) -> Result<Json<UpdateProjectResponse>, ApiError> {
    let key = query
        .project
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AnalyzerError::Validation("project parameter is required".to_owned()))?;

    let report = state.connector.ingest_project(&key).await?;
    Ok(Json(report.into()))
}
