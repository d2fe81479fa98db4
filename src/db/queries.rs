use chrono::{DateTime, Utc};
use sqlx::{PgPool, Result};
use uuid::Uuid;

use crate::db::models::{Enrollment, NewTransaction, PromoCode, Transaction};
use crate::domain::TransactionStatus;

// --- Transaction queries ---

pub async fn insert_transaction(pool: &PgPool, new: &NewTransaction) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            id, invoice_code, buyer_id, course_id, mentor_id, promo_code_id,
            amount, discount, total, admin_fee, mentor_earnings, platform_fee,
            payment_method, payment_channel,
            gateway_reference, merchant_ref, redirect_url, payment_instructions,
            status, expires_at, created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6,
            $7, $8, $9, $10, $11, $12,
            $13, $14,
            $15, $16, $17, $18,
            'pending', $19, NOW(), NOW()
        )
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&new.invoice_code)
    .bind(new.buyer_id)
    .bind(new.course_id)
    .bind(new.mentor_id)
    .bind(new.promo_code_id)
    .bind(&new.amount)
    .bind(&new.discount)
    .bind(&new.total)
    .bind(&new.admin_fee)
    .bind(&new.mentor_earnings)
    .bind(&new.platform_fee)
    .bind(new.payment_method.as_str())
    .bind(&new.payment_channel)
    .bind(&new.gateway_reference)
    .bind(&new.merchant_ref)
    .bind(&new.redirect_url)
    .bind(&new.payment_instructions)
    .bind(new.expires_at)
    .fetch_one(pool)
    .await
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub async fn get_by_invoice_code(pool: &PgPool, code: &str) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE invoice_code = $1 AND deleted_at IS NULL",
    )
    .bind(code)
    .fetch_optional(pool)
    .await
}

/// Looks a transaction up by the provider's correlation id, falling back to
/// the merchant reference (the invoice code we handed the provider).
pub async fn get_by_gateway_reference(pool: &PgPool, reference: &str) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE (gateway_reference = $1 OR merchant_ref = $1)
        AND deleted_at IS NULL
        "#,
    )
    .bind(reference)
    .fetch_optional(pool)
    .await
}

pub async fn invoice_code_exists(pool: &PgPool, code: &str) -> Result<bool> {
    let exists: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM transactions WHERE invoice_code = $1")
            .bind(code)
            .fetch_optional(pool)
            .await?;
    Ok(exists.is_some())
}

pub async fn list_transactions(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE deleted_at IS NULL
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Compare-and-set status transition: the row moves from `from` to `to` only
/// if it still holds `from`. Returns `None` when the CAS misses, in which
/// case the caller re-reads the row and classifies replay vs conflict.
///
/// This single conditional UPDATE is what makes transitions linearizable per
/// transaction under concurrent callbacks, admin actions and sweeps.
pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    from: TransactionStatus,
    to: TransactionStatus,
    failure_reason: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $3,
            paid_at = CASE WHEN $3 = 'paid' THEN NOW() ELSE paid_at END,
            failure_reason = COALESCE($4, failure_reason),
            metadata = COALESCE($5, metadata),
            updated_at = NOW()
        WHERE id = $1 AND status = $2 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(failure_reason)
    .bind(metadata)
    .fetch_optional(pool)
    .await
}

/// Pending gateway transactions whose provider-supplied expiry has passed.
/// Manual rows carry no expiry and are never swept.
pub async fn expired_pending(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE status = 'pending'
        AND expires_at IS NOT NULL
        AND expires_at < $1
        AND deleted_at IS NULL
        ORDER BY expires_at ASC
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await
}

pub async fn mark_activated(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE transactions SET activated_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Soft delete: the row stays for the audit trail, it just disappears from
/// every other query.
pub async fn soft_delete_transaction(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE transactions SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn status_counts(pool: &PgPool) -> Result<std::collections::HashMap<String, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM transactions WHERE deleted_at IS NULL GROUP BY status",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

// --- Promo code queries ---

pub async fn get_promo_code(pool: &PgPool, code: &str) -> Result<Option<PromoCode>> {
    sqlx::query_as::<_, PromoCode>(
        "SELECT id, code, discount_amount, discount_percent, active FROM promo_codes WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await
}

// --- Enrollment queries ---

pub async fn has_active_enrollment(pool: &PgPool, buyer_id: Uuid, course_id: Uuid) -> Result<bool> {
    let exists: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM enrollments WHERE buyer_id = $1 AND course_id = $2 AND status = 'active'",
    )
    .bind(buyer_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?;
    Ok(exists.is_some())
}

/// Idempotent enrollment activation: a second activation for the same buyer
/// and course re-activates rather than duplicating.
pub async fn upsert_enrollment(
    pool: &PgPool,
    buyer_id: Uuid,
    course_id: Uuid,
    transaction_id: Uuid,
) -> Result<Enrollment> {
    sqlx::query_as::<_, Enrollment>(
        r#"
        INSERT INTO enrollments (id, buyer_id, course_id, transaction_id, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 'active', NOW(), NOW())
        ON CONFLICT (buyer_id, course_id)
        DO UPDATE SET status = 'active', transaction_id = $4, updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(buyer_id)
    .bind(course_id)
    .bind(transaction_id)
    .fetch_one(pool)
    .await
}

// --- Earnings ledger queries ---

/// Credits the mentor for a settled transaction. Keyed by transaction id, so
/// a replayed activation is a no-op instead of a double credit.
pub async fn insert_earnings(
    pool: &PgPool,
    mentor_id: Uuid,
    transaction_id: Uuid,
    amount: &bigdecimal::BigDecimal,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mentor_earnings (id, mentor_id, transaction_id, amount, created_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (transaction_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(mentor_id)
    .bind(transaction_id)
    .bind(amount)
    .execute(pool)
    .await?;
    Ok(())
}

// --- Notification queue ---

/// Enqueues an outbound notification row. Delivery is an external concern;
/// this system only records that one is owed.
pub async fn enqueue_notification(
    pool: &PgPool,
    recipient_id: Uuid,
    transaction_id: Uuid,
    kind: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notifications (id, recipient_id, transaction_id, kind, created_at)
        VALUES ($1, $2, $3, $4, NOW())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(recipient_id)
    .bind(transaction_id)
    .bind(kind)
    .execute(pool)
    .await?;
    Ok(())
}
