//! Settlement coordinator: drives a purchase from checkout through the
//! gateway and the callback-driven state machine to activation.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::{NewTransaction, PromoCode, Transaction};
use crate::db::queries;
use crate::domain::invoice::{generate_invoice_code, MAX_GENERATION_ATTEMPTS};
use crate::domain::{classify_transition, PaymentMethod, TransactionStatus, TransitionCheck};
use crate::error::AppError;
use crate::fees::{round_to_cents, FeePolicy};
use crate::gateway::{CreatePaymentRequest, GatewayClient};
use crate::services::activation::ActivationSink;

/// Checkout-time settings, all explicit configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub invoice_prefix: String,
    pub return_url: String,
    pub callback_url: String,
    pub payment_window: Duration,
}

/// A checkout request as handed over by the platform: the catalog side owns
/// pricing and mentor attribution, this engine only settles it.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub buyer_id: Uuid,
    pub buyer_name: String,
    pub buyer_email: String,
    pub course_id: Uuid,
    pub course_title: String,
    pub course_price: BigDecimal,
    pub mentor_id: Uuid,
    pub promo_code: Option<String>,
    pub method: PaymentMethod,
    pub channel: Option<String>,
}

#[derive(Debug)]
pub struct CheckoutOutcome {
    pub transaction: Transaction,
    pub redirect_url: Option<String>,
}

/// Acknowledgment returned to the provider. Everything past signature
/// verification is a 2xx; the variants exist so logs and tests can tell the
/// cases apart.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackAck {
    /// State actually changed.
    Processed { invoice_code: String },
    /// Duplicate delivery of an already-applied outcome.
    Replayed { invoice_code: String },
    /// No transaction matches the provider's reference.
    Ignored { reference: String },
    /// The reported outcome conflicts with the current state. Logged for
    /// investigation; the provider cannot act on it, so still acknowledged.
    Conflict { invoice_code: String, detail: String },
}

#[derive(Debug, Deserialize)]
struct GatewayCallback {
    reference: String,
    #[serde(default)]
    merchant_ref: Option<String>,
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Maps the provider's status vocabulary onto ours. Unknown strings return
/// `None` and the callback is ignored rather than guessed at.
fn map_reported_outcome(status: &str) -> Option<TransactionStatus> {
    match status {
        "PAID" | "SETTLED" => Some(TransactionStatus::Paid),
        "EXPIRED" => Some(TransactionStatus::Expired),
        "FAILED" | "REFUSED" => Some(TransactionStatus::Failed),
        _ => None,
    }
}

/// Discount supplied by a promo code: flat amount wins over percentage,
/// inactive codes supply nothing. Anything else about promo validity is
/// upstream's problem.
fn promo_discount(promo: &PromoCode, price: &BigDecimal) -> BigDecimal {
    use bigdecimal::Zero;

    if !promo.active {
        return BigDecimal::zero();
    }
    if let Some(amount) = &promo.discount_amount {
        return amount.with_scale(2);
    }
    if let Some(pct) = &promo.discount_percent {
        return round_to_cents(&(price * pct / BigDecimal::from(100)));
    }
    BigDecimal::zero()
}

enum TransitionResult {
    Applied(Transaction),
    Replayed,
    Conflict(String),
}

pub struct SettlementService {
    pool: PgPool,
    gateway: GatewayClient,
    fees: FeePolicy,
    activation: Arc<dyn ActivationSink>,
    settings: CheckoutSettings,
}

impl SettlementService {
    pub fn new(
        pool: PgPool,
        gateway: GatewayClient,
        fees: FeePolicy,
        activation: Arc<dyn ActivationSink>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            pool,
            gateway,
            fees,
            activation,
            settings,
        }
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// Creates a purchase transaction. For the gateway method the remote
    /// payment intent is created first; if that fails the checkout aborts
    /// with no persisted row, never a pending row missing its correlation.
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, AppError> {
        if queries::has_active_enrollment(&self.pool, request.buyer_id, request.course_id).await? {
            return Err(AppError::Validation(
                "buyer is already enrolled in this course".to_string(),
            ));
        }

        let (promo_code_id, discount) = self.resolve_discount(&request).await?;
        let breakdown = self
            .fees
            .quote(&request.course_price, &discount, request.method)?;

        let invoice_code = self.unique_invoice_code().await?;

        let (correlation, expires_at) = match request.method {
            PaymentMethod::Gateway => {
                let expires_at = Utc::now() + self.settings.payment_window;
                let handle = self
                    .gateway
                    .create_payment(&CreatePaymentRequest {
                        invoice_code: invoice_code.clone(),
                        amount: breakdown.total.clone(),
                        channel: request.channel.clone().unwrap_or_default(),
                        customer_name: request.buyer_name.clone(),
                        customer_email: request.buyer_email.clone(),
                        item_description: request.course_title.clone(),
                        return_url: self.settings.return_url.clone(),
                        callback_url: self.settings.callback_url.clone(),
                        expires_at,
                    })
                    .await?;
                let expiry = handle.expires_at;
                (Some(handle), Some(expiry))
            }
            PaymentMethod::Manual => (None, None),
        };

        let transaction = queries::insert_transaction(
            &self.pool,
            &NewTransaction {
                invoice_code: invoice_code.clone(),
                buyer_id: request.buyer_id,
                course_id: request.course_id,
                mentor_id: request.mentor_id,
                promo_code_id,
                amount: breakdown.amount,
                discount: breakdown.discount,
                total: breakdown.total,
                admin_fee: breakdown.admin_fee,
                mentor_earnings: breakdown.mentor_earnings,
                platform_fee: breakdown.platform_fee,
                payment_method: request.method,
                payment_channel: request.channel,
                gateway_reference: correlation.as_ref().map(|h| h.external_reference.clone()),
                merchant_ref: correlation.as_ref().map(|_| invoice_code.clone()),
                redirect_url: correlation.as_ref().map(|h| h.redirect_url.clone()),
                payment_instructions: correlation
                    .as_ref()
                    .and_then(|h| h.payment_instructions.clone()),
                expires_at,
            },
        )
        .await?;

        info!(
            invoice_code = %transaction.invoice_code,
            method = %transaction.payment_method,
            total = %transaction.total,
            "checkout created"
        );

        Ok(CheckoutOutcome {
            redirect_url: transaction.redirect_url.clone(),
            transaction,
        })
    }

    /// Ingests a gateway callback. Signature verification happens before the
    /// body is parsed at all; past that point everything is acknowledged so
    /// the provider stops retrying.
    pub async fn handle_callback(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<CallbackAck, AppError> {
        if !self.gateway.verify_callback(raw_body, signature) {
            warn!("callback rejected: signature mismatch");
            return Err(AppError::Unauthorized(
                "invalid callback signature".to_string(),
            ));
        }

        let callback: GatewayCallback = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::BadRequest(format!("unparseable callback body: {}", e)))?;

        let target = match map_reported_outcome(&callback.status) {
            Some(target) => target,
            None => {
                warn!(status = %callback.status, "ignoring callback with unknown outcome");
                return Ok(CallbackAck::Ignored {
                    reference: callback.reference,
                });
            }
        };

        let lookup = match queries::get_by_gateway_reference(&self.pool, &callback.reference).await?
        {
            Some(tx) => Some(tx),
            None => match &callback.merchant_ref {
                Some(merchant_ref) => queries::get_by_invoice_code(&self.pool, merchant_ref).await?,
                None => None,
            },
        };

        let transaction = match lookup {
            Some(tx) => tx,
            None => {
                info!(reference = %callback.reference, "callback for unknown transaction ignored");
                return Ok(CallbackAck::Ignored {
                    reference: callback.reference,
                });
            }
        };

        let raw: serde_json::Value = serde_json::from_slice(raw_body)
            .unwrap_or_else(|_| serde_json::Value::Null);

        match self
            .apply_transition(
                &transaction,
                target,
                callback.reason.as_deref(),
                Some(&raw),
            )
            .await?
        {
            TransitionResult::Applied(updated) => {
                if target == TransactionStatus::Paid {
                    self.activate(&updated).await;
                }
                info!(
                    invoice_code = %updated.invoice_code,
                    status = %updated.status,
                    "callback processed"
                );
                Ok(CallbackAck::Processed {
                    invoice_code: updated.invoice_code,
                })
            }
            TransitionResult::Replayed => {
                info!(
                    invoice_code = %transaction.invoice_code,
                    status = %transaction.status,
                    "duplicate callback replayed as no-op"
                );
                Ok(CallbackAck::Replayed {
                    invoice_code: transaction.invoice_code,
                })
            }
            TransitionResult::Conflict(detail) => {
                // The provider cannot act on a conflict; log it and ack.
                error!(
                    invoice_code = %transaction.invoice_code,
                    detail = %detail,
                    "conflicting callback outcome"
                );
                Ok(CallbackAck::Conflict {
                    invoice_code: transaction.invoice_code,
                    detail,
                })
            }
        }
    }

    /// Admin approval of a manual-payment transaction. Idempotent on repeat
    /// approval; conflicting states surface as 409 so the admin UI can show
    /// them.
    pub async fn approve_manual(&self, id: Uuid) -> Result<Transaction, AppError> {
        let transaction = self.manual_transaction(id).await?;

        match self
            .apply_transition(&transaction, TransactionStatus::Paid, None, None)
            .await?
        {
            TransitionResult::Applied(updated) => {
                self.activate(&updated).await;
                info!(invoice_code = %updated.invoice_code, "manual payment approved");
                Ok(updated)
            }
            TransitionResult::Replayed => Ok(transaction),
            TransitionResult::Conflict(_) => Err(self.conflict_error(&transaction, TransactionStatus::Paid)),
        }
    }

    /// Admin rejection of a manual-payment transaction.
    pub async fn reject_manual(
        &self,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Transaction, AppError> {
        let transaction = self.manual_transaction(id).await?;

        match self
            .apply_transition(&transaction, TransactionStatus::Failed, reason, None)
            .await?
        {
            TransitionResult::Applied(updated) => {
                info!(invoice_code = %updated.invoice_code, "manual payment rejected");
                Ok(updated)
            }
            TransitionResult::Replayed => Ok(transaction),
            TransitionResult::Conflict(_) => {
                Err(self.conflict_error(&transaction, TransactionStatus::Failed))
            }
        }
    }

    /// Admin-triggered refund of a paid transaction. Reversing the activation
    /// side effects (revoking enrollment, clawing back earnings) is an
    /// external collaborator concern.
    pub async fn refund(&self, id: Uuid, reason: Option<&str>) -> Result<Transaction, AppError> {
        let transaction = queries::get_transaction(&self.pool, id)
            .await
            .map_err(not_found(id))?;

        let updated = queries::transition_status(
            &self.pool,
            transaction.id,
            TransactionStatus::Paid,
            TransactionStatus::Refund,
            reason,
            None,
        )
        .await?;

        match updated {
            Some(tx) => {
                info!(invoice_code = %tx.invoice_code, "transaction refunded");
                Ok(tx)
            }
            None => {
                let current = queries::get_transaction(&self.pool, id).await?;
                if current.status().map_err(AppError::Internal)? == TransactionStatus::Refund {
                    Ok(current)
                } else {
                    Err(self.conflict_error(&current, TransactionStatus::Refund))
                }
            }
        }
    }

    /// Expiry sweep: every pending gateway transaction past its expiry goes
    /// to `expired`, exactly once. Rows that settle concurrently lose the
    /// race and are skipped.
    pub async fn sweep_expired(&self, now: chrono::DateTime<Utc>) -> Result<u64, AppError> {
        let candidates = queries::expired_pending(&self.pool, now).await?;
        let mut swept = 0u64;

        for candidate in candidates {
            let updated = queries::transition_status(
                &self.pool,
                candidate.id,
                TransactionStatus::Pending,
                TransactionStatus::Expired,
                None,
                None,
            )
            .await?;

            match updated {
                Some(tx) => {
                    info!(invoice_code = %tx.invoice_code, "transaction expired");
                    swept += 1;
                }
                None => {
                    // Lost the race to a callback; the winner owns the row now.
                    info!(invoice_code = %candidate.invoice_code, "sweep skipped settled row");
                }
            }
        }

        Ok(swept)
    }

    async fn resolve_discount(
        &self,
        request: &CheckoutRequest,
    ) -> Result<(Option<Uuid>, BigDecimal), AppError> {
        use bigdecimal::Zero;

        let code = match &request.promo_code {
            Some(code) => code,
            None => return Ok((None, BigDecimal::zero())),
        };

        match queries::get_promo_code(&self.pool, code).await? {
            Some(promo) if promo.active => {
                let discount = promo_discount(&promo, &request.course_price);
                Ok((Some(promo.id), discount))
            }
            _ => {
                // Invalid or inactive codes quietly supply no discount.
                Ok((None, BigDecimal::zero()))
            }
        }
    }

    /// Generates an invoice code and proves uniqueness against the store,
    /// retrying a bounded number of times before failing closed.
    async fn unique_invoice_code(&self) -> Result<String, AppError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let code = generate_invoice_code(&self.settings.invoice_prefix, Utc::now());
            if !queries::invoice_code_exists(&self.pool, &code).await? {
                return Ok(code);
            }
            warn!(code = %code, "invoice code collision, retrying");
        }

        Err(AppError::Internal(format!(
            "could not generate a unique invoice code in {} attempts",
            MAX_GENERATION_ATTEMPTS
        )))
    }

    /// Guarded transition out of `pending` via a compare-and-set on the row.
    /// A missed CAS is re-read and classified: same target state means a
    /// replay, anything else a conflict.
    async fn apply_transition(
        &self,
        transaction: &Transaction,
        target: TransactionStatus,
        reason: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<TransitionResult, AppError> {
        let updated = queries::transition_status(
            &self.pool,
            transaction.id,
            TransactionStatus::Pending,
            target,
            reason,
            metadata,
        )
        .await?;

        if let Some(tx) = updated {
            return Ok(TransitionResult::Applied(tx));
        }

        let current = queries::get_transaction(&self.pool, transaction.id).await?;
        let current_status = TransactionStatus::from_str(&current.status)
            .map_err(AppError::Internal)?;

        match classify_transition(current_status, target) {
            Ok(TransitionCheck::Replay) => Ok(TransitionResult::Replayed),
            Ok(TransitionCheck::Apply) | Err(_) => Ok(TransitionResult::Conflict(format!(
                "cannot move '{}' from '{}' to '{}'",
                current.invoice_code, current.status, target
            ))),
        }
    }

    /// Fires the activation sink after an actual `pending -> paid` change.
    /// A sink failure leaves the row paid with `activated_at` unset; the
    /// financial fact is already settled, reconciliation retries the rest.
    async fn activate(&self, transaction: &Transaction) {
        match self.activation.on_transaction_paid(transaction).await {
            Ok(()) => {
                if let Err(e) = queries::mark_activated(&self.pool, transaction.id).await {
                    error!(
                        invoice_code = %transaction.invoice_code,
                        "failed to record activation: {}", e
                    );
                }
            }
            Err(e) => {
                error!(
                    invoice_code = %transaction.invoice_code,
                    "activation failed, left for reconciliation: {}", e
                );
            }
        }
    }

    async fn manual_transaction(&self, id: Uuid) -> Result<Transaction, AppError> {
        let transaction = queries::get_transaction(&self.pool, id)
            .await
            .map_err(not_found(id))?;

        if transaction.method().map_err(AppError::Internal)? != PaymentMethod::Manual {
            return Err(AppError::Validation(
                "only manual-payment transactions can be approved or rejected by an admin"
                    .to_string(),
            ));
        }

        Ok(transaction)
    }

    fn conflict_error(&self, transaction: &Transaction, target: TransactionStatus) -> AppError {
        match transaction
            .status()
            .map_err(AppError::Internal)
            .and_then(|current| classify_transition(current, target).map_err(AppError::from))
        {
            Err(e) => e,
            // CAS missed but the classifier sees a legal move: the row changed
            // again between read and classify. Report it as a conflict anyway.
            Ok(_) => AppError::Validation(format!(
                "transaction '{}' changed state concurrently",
                transaction.invoice_code
            )),
        }
    }
}

fn not_found(id: Uuid) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound(format!("transaction {} not found", id)),
        other => AppError::Database(other),
    }
}
