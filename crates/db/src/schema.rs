use analyzer_common::error::{AnalyzerError, AnalyzerResult};
use sqlx::PgPool;

/// Advisory lock key serializing concurrent schema bootstraps.
const SCHEMA_LOCK_KEY: i64 = 0x6a69_7261;

const SCHEMA: &[&str] = &[
    "create table if not exists projects (
       id serial primary key,
       title text not null unique,
       key text not null,
       url text not null default ''
     )",
    "create table if not exists author (
       id serial primary key,
       name text not null unique
     )",
    "create table if not exists issue (
       id serial primary key,
       projectId integer not null references projects(id),
       authorId integer not null references author(id),
       assigneeId integer references author(id),
       key text not null unique,
       summary text not null default '',
       description text not null default '',
       type text not null default '',
       priority text not null default '',
       status text not null default '',
       createdTime timestamptz not null,
       closedTime timestamptz not null,
       updatedTime timestamptz not null,
       timeSpent bigint not null default 0
     )",
    "create table if not exists statuschanges (
       issueId integer not null references issue(id),
       authorId integer not null references author(id),
       changeTime timestamptz not null,
       fromStatus text not null default '',
       toStatus text not null default ''
     )",
    "create unique index if not exists statuschanges_issue_time_uidx
       on statuschanges(issueId, changeTime)",
    "create index if not exists issue_project_idx on issue(projectId)",
];

/// Create the ingestion tables if they do not exist yet.
///
/// Safe to call from several processes at once: the DDL runs under a
/// transaction-scoped advisory lock.
pub async fn ensure_schema(pool: &PgPool) -> AnalyzerResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AnalyzerError::Database(e.to_string()))?;

    sqlx::query("select pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(|e| AnalyzerError::Database(e.to_string()))?;

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| AnalyzerError::Database(e.to_string()))?;
    }

    tx.commit()
        .await
        .map_err(|e| AnalyzerError::Database(e.to_string()))?;

    tracing::info!(statements = SCHEMA.len(), "database schema ensured");
    Ok(())
}
