use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project row keyed by its unique title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbProject {
    pub title: String,
    pub key: String,
    pub url: String,
}

/// The mutable columns of an `issue` row. Foreign keys are resolved at push time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbIssue {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub issue_type: String,
    pub priority: String,
    pub status: String,
    pub created_time: DateTime<Utc>,
    pub closed_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
    pub time_spent: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub change_time: DateTime<Utc>,
    pub from_status: String,
    pub to_status: String,
}

/// Everything needed to persist one issue: the issue itself, the entities it
/// references by natural key, and its status changes keyed by author name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub project: DbProject,
    pub issue: DbIssue,
    pub author: String,
    pub assignee: Option<String>,
    pub status_changes: BTreeMap<String, StatusChange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSummary {
    pub issues: usize,
    pub status_changes_inserted: usize,
    pub status_changes_skipped: usize,
}
