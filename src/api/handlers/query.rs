// Query endpoints: the federated pipeline and the ad-hoc local-store
// surface.
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::Row;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

/// Full federated pipeline: decompose, map across sources, reduce.
pub async fn execute_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let start_time = Instant::now();

    let result = state.service.execute(&payload.sql).await?;

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::info!(
        "Federated query produced {} rows in {}ms",
        result.rows.len(),
        execution_time_ms
    );

    Ok(Json(QueryResponse {
        columns: result.columns,
        row_count: result.rows.len(),
        rows: result.rows,
        execution_time_ms,
    }))
}

/// Ad-hoc SQL against the embedded local store.
pub async fn store_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let start_time = Instant::now();

    let result = state.service.store_query(&payload.sql).await?;

    let execution_time_ms = start_time.elapsed().as_millis() as u64;

    Ok(Json(QueryResponse {
        columns: result.columns,
        row_count: result.rows.len(),
        rows: result.rows,
        execution_time_ms,
    }))
}
