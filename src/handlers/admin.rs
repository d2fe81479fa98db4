use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ActionPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub swept: u64,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state.settlement.approve_manual(id).await?;
    Ok(Json(transaction))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActionPayload>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .settlement
        .reject_manual(id, payload.reason.as_deref())
        .await?;
    Ok(Json(transaction))
}

pub async fn refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActionPayload>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .settlement
        .refund(id, payload.reason.as_deref())
        .await?;
    Ok(Json(transaction))
}

/// Soft delete: the row is hidden from every query but kept for the audit
/// trail. Nothing hard-deletes transactions.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let removed = crate::db::queries::soft_delete_transaction(&state.db, id).await?;
    if !removed {
        return Err(AppError::NotFound(format!("transaction {} not found", id)));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Manual trigger for the expiry sweep; the background loop runs the same
/// pass on a schedule.
pub async fn sweep(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let swept = state.settlement.sweep_expired(Utc::now()).await?;
    Ok(Json(SweepResponse { swept }))
}
