pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod fees;
pub mod gateway;
pub mod handlers;
pub mod services;
pub mod startup;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::services::SettlementService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub settlement: Arc<SettlementService>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/channels", get(handlers::checkout::list_channels))
        .route("/callback", post(handlers::callback::callback))
        .route("/transactions", get(handlers::transactions::list_transactions))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/admin/transactions/:id/approve", post(handlers::admin::approve))
        .route("/admin/transactions/:id/reject", post(handlers::admin::reject))
        .route("/admin/transactions/:id/refund", post(handlers::admin::refund))
        .route("/admin/transactions/:id", delete(handlers::admin::remove))
        .route("/admin/sweep", post(handlers::admin::sweep))
        .with_state(state)
}
