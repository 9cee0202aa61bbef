pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::{get, post};
use axum::Router;

use crate::service::Connector;
use crate::AppState;

pub fn router<C: Connector>() -> Router<AppState<C>> {
    Router::new()
        .route("/api/v1/connector/projects", get(handlers::list_projects::<C>))
        .route(
            "/api/v1/connector/updateProject",
            post(handlers::update_project::<C>),
        )
}
