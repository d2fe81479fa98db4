use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::PaymentMethod;
use crate::error::AppError;
use crate::services::CheckoutRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutPayload {
    pub buyer_id: Uuid,
    pub buyer_name: String,
    pub buyer_email: String,
    pub course_id: Uuid,
    pub course_title: String,
    pub course_price: BigDecimal,
    pub mentor_id: Uuid,
    pub promo_code: Option<String>,
    pub payment_method: String,
    pub payment_channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub invoice_code: String,
    pub status: String,
    pub total: BigDecimal,
    /// Present for the gateway method; the buyer completes payment there.
    pub redirect_url: Option<String>,
}

pub async fn checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutPayload>,
) -> Result<impl IntoResponse, AppError> {
    let method: PaymentMethod = payload
        .payment_method
        .parse()
        .map_err(AppError::BadRequest)?;

    let outcome = state
        .settlement
        .checkout(CheckoutRequest {
            buyer_id: payload.buyer_id,
            buyer_name: payload.buyer_name,
            buyer_email: payload.buyer_email,
            course_id: payload.course_id,
            course_title: payload.course_title,
            course_price: payload.course_price,
            mentor_id: payload.mentor_id,
            promo_code: payload.promo_code,
            method,
            channel: payload.payment_channel,
        })
        .await?;

    let response = CheckoutResponse {
        invoice_code: outcome.transaction.invoice_code,
        status: outcome.transaction.status,
        total: outcome.transaction.total,
        redirect_url: outcome.redirect_url,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Lists gateway payment channels. Degrades to an empty list when the
/// provider is unreachable; manual payment is always available.
pub async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    let channels = state.settlement.gateway().list_channels().await;
    Json(channels)
}
