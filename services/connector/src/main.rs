mod api;
mod error;
mod jira;
mod service;

use std::net::SocketAddr;
use std::sync::Arc;

use analyzer_common::types::ServiceInfo;
use analyzer_config::{init_tracing, AppConfig};
use analyzer_db::jira::pg_repository::PgJiraRepository;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::jira::client::{JiraClient, JiraClientConfig};
use crate::jira::fetcher::ConcurrentFetcher;
use crate::jira::transform::DataTransformer;
use crate::service::{Connector, JiraService};

pub struct AppState<C> {
    pub connector: Arc<C>,
    pub info: Arc<ServiceInfo>,
}

impl<C> AppState<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            info: Arc::new(ServiceInfo::new(
                "analyzer-connector",
                env!("CARGO_PKG_VERSION"),
            )),
        }
    }
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            info: Arc::clone(&self.info),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info<C: Connector>(State(state): State<AppState<C>>) -> Json<serde_json::Value> {
    let info = &state.info;
    Json(serde_json::json!({
        "name": info.name,
        "version": info.version,
        "instanceId": info.instance_id,
        "startedAt": info.started_at,
        "uptimeSecs": info.uptime_secs(chrono::Utc::now()),
    }))
}

fn build_router<C: Connector>(state: AppState<C>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/info", get(info::<C>))
        .merge(api::router::<C>())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);

    let jira_config = JiraClientConfig::from_env().expect("failed to load Jira config");
    tracing::info!(
        service = "analyzer-connector",
        jira = %jira_config.base_url,
        threads = jira_config.thread_count,
        batch = jira_config.issues_per_request,
        "starting"
    );

    let pool = analyzer_db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");
    analyzer_db::schema::ensure_schema(&pool)
        .await
        .expect("failed to prepare database schema");

    let client = JiraClient::new(jira_config).expect("failed to build HTTP client");
    let settings = client.config().clone();
    let fetcher = ConcurrentFetcher::new(
        Arc::new(client.clone()),
        settings.thread_count,
        settings.issues_per_request,
    );
    let service = JiraService::new(
        client,
        fetcher,
        DataTransformer::new(&settings.base_url),
        PgJiraRepository::new(pool),
    );

    let state = AppState::new(service);
    tracing::info!(instance_id = %state.info.instance_id, "service identity");
    let app = build_router(state);
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}
