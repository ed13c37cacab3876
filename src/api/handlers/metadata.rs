// Schema validation endpoint: triggers a reconciliation pass and returns
// the resulting column metadata.
use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::ColumnMetadata;

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub sources: Vec<String>,
    pub metadata: ColumnMetadata,
}

pub async fn get_metadata(
    State(state): State<AppState>,
) -> Result<Json<MetadataResponse>, AppError> {
    tracing::info!(
        "Reconciling schemas across {} source(s)",
        state.service.registry().len()
    );

    let metadata = state.service.validate().await?;

    let sources = state
        .service
        .registry()
        .iter()
        .map(|(_, source)| source.name.clone())
        .collect();

    Ok(Json(MetadataResponse { sources, metadata }))
}
