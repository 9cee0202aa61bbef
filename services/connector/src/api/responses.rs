use serde::Serialize;

use crate::service::IngestReport;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectResponse {
    pub project: String,
    pub status: String,
    pub issues: usize,
    pub status_changes_inserted: usize,
    pub status_changes_skipped: usize,
}

impl From<IngestReport> for UpdateProjectResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            project: report.project,
            status: "updated".to_owned(),
            issues: report.issues,
            status_changes_inserted: report.status_changes_inserted,
            status_changes_skipped: report.status_changes_skipped,
        }
    }
}
