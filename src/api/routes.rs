use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{metadata, model, query, AppState};
use crate::services::FederationService;

/// Create the application router with its shared state.
pub fn create_router(service: Arc<FederationService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/metadata", get(metadata::get_metadata))
        .route("/api/models/build", post(model::build_model))
        .route("/api/query", post(query::execute_query))
        .route("/api/store/query", post(query::store_query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
