use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::AppState;
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub processed: i32,
    pub updated: i32,
    pub errors: i32,
    pub summary: String,
}

/// Manual trigger. Runs the same pass as the scheduler, synchronously, and
/// returns the counts. 409 while another run is in flight.
pub async fn trigger(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let summary = state.reconciler.run().await?;

    Ok(Json(ReconcileResponse {
        processed: summary.processed,
        updated: summary.updated,
        errors: summary.errors,
        summary: summary.summary_line(),
    }))
}

/// Last persisted run summary, 404 before the first run completes.
pub async fn last_run(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    match state.stats.last().await? {
        Some(summary) => Ok(Json(summary)),
        None => Err(AppError::NotFound(
            "no reconciliation run recorded yet".to_string(),
        )),
    }
}
