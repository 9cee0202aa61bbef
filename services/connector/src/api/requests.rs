use serde::Deserialize;

/// Query of the project listing. Numbers arrive as text so that malformed
/// values are reported as validation errors rather than extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectsQuery {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProjectQuery {
    pub project: Option<String>,
}
