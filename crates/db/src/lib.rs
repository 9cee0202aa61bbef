pub mod jira;
pub mod schema;

use analyzer_common::error::{AnalyzerError, AnalyzerResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> AnalyzerResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| AnalyzerError::Database(e.to_string()))
}
