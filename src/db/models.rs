use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{PaymentMethod, TransactionStatus};

/// A course purchase attempt and its settlement state.
///
/// Monetary and gateway-correlation fields are frozen once `status` leaves
/// `pending`; mutation goes exclusively through the compare-and-set queries
/// in [`crate::db::queries`]. Rows are soft-deleted only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub invoice_code: String,
    pub buyer_id: Uuid,
    pub course_id: Uuid,
    pub mentor_id: Uuid,
    pub promo_code_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub discount: BigDecimal,
    pub total: BigDecimal,
    pub admin_fee: BigDecimal,
    pub mentor_earnings: BigDecimal,
    pub platform_fee: BigDecimal,
    pub payment_method: String,
    pub payment_channel: Option<String>,
    pub gateway_reference: Option<String>,
    pub merchant_ref: Option<String>,
    pub redirect_url: Option<String>,
    pub payment_instructions: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a pending transaction. Everything else on the row
/// is derived (ids, timestamps) or starts empty.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub invoice_code: String,
    pub buyer_id: Uuid,
    pub course_id: Uuid,
    pub mentor_id: Uuid,
    pub promo_code_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub discount: BigDecimal,
    pub total: BigDecimal,
    pub admin_fee: BigDecimal,
    pub mentor_earnings: BigDecimal,
    pub platform_fee: BigDecimal,
    pub payment_method: PaymentMethod,
    pub payment_channel: Option<String>,
    pub gateway_reference: Option<String>,
    pub merchant_ref: Option<String>,
    pub redirect_url: Option<String>,
    pub payment_instructions: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn status(&self) -> Result<TransactionStatus, String> {
        self.status.parse()
    }

    pub fn method(&self) -> Result<PaymentMethod, String> {
        self.payment_method.parse()
    }

    /// `total = max(amount - discount, 0) + admin_fee`, checked at scale 2.
    pub fn totals_consistent(&self) -> bool {
        use bigdecimal::Zero;
        let b = &self.amount - &self.discount;
        let base = if b < BigDecimal::zero() {
            BigDecimal::zero()
        } else {
            b
        };
        (base + &self.admin_fee).with_scale(2) == self.total.with_scale(2)
    }
}

/// Buyer access to a course, activated when a transaction settles.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub course_id: Uuid,
    pub transaction_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only view of a promo code. Validation rules beyond the discount it
/// supplies belong to the catalog side of the platform.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub discount_amount: Option<BigDecimal>,
    pub discount_percent: Option<BigDecimal>,
    pub active: bool,
}
