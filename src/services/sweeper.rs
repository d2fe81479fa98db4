//! Background expiry sweep.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::services::settlement::SettlementService;

/// Runs the expiry sweep loop. Each pass moves overdue pending transactions
/// to `expired` through the same guarded state machine callbacks use, so a
/// sweep can never clobber a concurrent settlement. Errors are logged and
/// the loop keeps going.
pub async fn run_sweeper(service: Arc<SettlementService>, interval_secs: u64) {
    info!(interval_secs, "expiry sweeper started");

    loop {
        match service.sweep_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(swept) => info!(swept, "expiry sweep pass completed"),
            Err(e) => error!("expiry sweep pass failed: {}", e),
        }

        sleep(Duration::from_secs(interval_secs)).await;
    }
}
