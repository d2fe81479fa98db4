use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-callback-signature";

/// Gateway callback ingestion. The signature is verified over the raw body
/// bytes before anything is parsed; only a signature failure produces a
/// non-2xx response, so the provider's retry policy settles down for every
/// authenticated delivery, including ignored and conflicting ones.
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing callback signature".to_string()))?;

    let ack = state.settlement.handle_callback(&body, signature).await?;

    Ok((StatusCode::OK, Json(ack)))
}
