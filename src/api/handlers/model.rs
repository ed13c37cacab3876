// Model build endpoint: reconciles schemas and bulk-ingests whole logical
// tables into the local store.
use axum::{extract::State, Json};
use serde::Deserialize;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::BuildReport;

#[derive(Debug, Deserialize)]
pub struct BuildModelRequest {
    /// Logical table to build; omitted means every served table.
    pub target: Option<String>,
}

pub async fn build_model(
    State(state): State<AppState>,
    Json(payload): Json<BuildModelRequest>,
) -> Result<Json<BuildReport>, AppError> {
    tracing::info!(
        "Building model {}",
        payload.target.as_deref().unwrap_or("(all tables)")
    );

    let report = state.service.build_model(payload.target.as_deref()).await?;

    Ok(Json(report))
}
