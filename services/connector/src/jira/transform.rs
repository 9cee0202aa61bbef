use std::collections::BTreeMap;

use analyzer_db::jira::models::{DbIssue, DbProject, IssueRecord, StatusChange};
use chrono::{DateTime, Utc};

use super::models::{Changelog, JiraIssue, JiraProject};

/// Layout of every timestamp the tracker sends, e.g. `2023-01-01T10:00:00.000-0700`.
pub const JIRA_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Parse a tracker timestamp. Missing or malformed values map to the zero
/// time (the Unix epoch) instead of failing the issue.
pub fn parse_jira_time(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_str(s, JIRA_TIME_LAYOUT).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Maps wire records onto storage records. Pure: no I/O, no clock.
#[derive(Debug, Clone)]
pub struct DataTransformer {
    base_url: String,
}

impl DataTransformer {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn transform_project(&self, project: &JiraProject) -> DbProject {
        DbProject {
            title: project.name.clone(),
            key: project.key.clone(),
            url: format!("{}/projects/{}", self.base_url, project.name.replace(' ', "_")),
        }
    }

    pub fn transform_issue(&self, issue: &JiraIssue) -> DbIssue {
        let fields = &issue.fields;
        DbIssue {
            key: issue.key.clone(),
            summary: fields.summary.clone(),
            description: fields.description.clone().unwrap_or_default(),
            issue_type: fields
                .issuetype
                .as_ref()
                .map(|t| t.description.clone())
                .unwrap_or_default(),
            priority: fields
                .priority
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_default(),
            status: fields
                .status
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            created_time: parse_jira_time(fields.created.as_deref()),
            closed_time: parse_jira_time(fields.resolutiondate.as_deref()),
            updated_time: parse_jira_time(fields.updated.as_deref()),
            time_spent: fields.timespent.unwrap_or_default(),
        }
    }

    /// Collect `status` transitions keyed by author name. An author with
    /// several transitions keeps only the last one in changelog order.
    pub fn transform_status_changes(&self, changelog: &Changelog) -> BTreeMap<String, StatusChange> {
        let mut changes = BTreeMap::new();
        for history in &changelog.histories {
            let author = history
                .author
                .as_ref()
                .map(|a| a.name.clone())
                .unwrap_or_default();
            for item in history.items.iter().filter(|item| item.field == "status") {
                changes.insert(
                    author.clone(),
                    StatusChange {
                        change_time: parse_jira_time(Some(&history.created)),
                        from_status: item.from_value.clone().unwrap_or_default(),
                        to_status: item.to_value.clone().unwrap_or_default(),
                    },
                );
            }
        }
        changes
    }

    pub fn transform_issue_set(&self, project: &JiraProject, issue: &JiraIssue) -> IssueRecord {
        IssueRecord {
            project: self.transform_project(project),
            issue: self.transform_issue(issue),
            author: issue
                .fields
                .creator
                .as_ref()
                .map(|u| u.name.clone())
                .unwrap_or_default(),
            assignee: issue
                .fields
                .assignee
                .as_ref()
                .map(|u| u.name.clone())
                .filter(|name| !name.is_empty()),
            status_changes: self.transform_status_changes(&issue.changelog),
        }
    }
}
