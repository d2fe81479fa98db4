//! Activation sink: the side effects owed exactly once per paid transaction.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use crate::db::models::Transaction;
use crate::db::queries;

/// Invoked once per transaction reaching `paid`. The coordinator ties the
/// invocation to the state transition actually occurring, so replayed
/// callbacks never reach this trait; implementations are still expected to be
/// idempotent as defense-in-depth.
#[async_trait]
pub trait ActivationSink: Send + Sync {
    async fn on_transaction_paid(&self, tx: &Transaction) -> anyhow::Result<()>;
}

/// Default sink: activates the enrollment, credits the mentor's earnings
/// ledger and enqueues a purchase notification. Notification delivery itself
/// is an external concern.
pub struct DbActivationSink {
    pool: PgPool,
}

impl DbActivationSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivationSink for DbActivationSink {
    async fn on_transaction_paid(&self, tx: &Transaction) -> anyhow::Result<()> {
        let enrollment =
            queries::upsert_enrollment(&self.pool, tx.buyer_id, tx.course_id, tx.id).await?;

        queries::insert_earnings(&self.pool, tx.mentor_id, tx.id, &tx.mentor_earnings).await?;

        queries::enqueue_notification(&self.pool, tx.buyer_id, tx.id, "purchase_settled").await?;

        info!(
            invoice_code = %tx.invoice_code,
            enrollment_id = %enrollment.id,
            mentor_earnings = %tx.mentor_earnings,
            "activation completed"
        );

        Ok(())
    }
}
