//! End-to-end settlement flows against a real database.
//!
//! These tests require DATABASE_URL pointing at a migrated Postgres instance
//! and are ignored by default: run with `cargo test -- --ignored`.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use coursepay_core::db::models::NewTransaction;
use coursepay_core::db::queries;
use coursepay_core::domain::PaymentMethod;
use coursepay_core::error::AppError;
use coursepay_core::fees::FeePolicy;
use coursepay_core::gateway::GatewayClient;
use coursepay_core::services::{
    CallbackAck, CheckoutRequest, CheckoutSettings, DbActivationSink, SettlementService,
};

type HmacSha256 = Hmac<Sha256>;

const CALLBACK_SECRET: &str = "test-callback-secret";

async fn setup() -> (PgPool, SettlementService) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test DB");
    Migrator::new(Path::new("./migrations"))
        .await
        .expect("Failed to load migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test DB");

    // The gateway URL is unreachable on purpose: none of these flows may
    // depend on an outbound call except explicit gateway checkouts.
    let gateway = GatewayClient::new(
        "http://127.0.0.1:9".to_string(),
        "M-TEST".to_string(),
        "api-key".to_string(),
        CALLBACK_SECRET.to_string(),
    );

    let service = SettlementService::new(
        pool.clone(),
        gateway,
        FeePolicy::new("2".parse().unwrap(), "10".parse().unwrap()).unwrap(),
        Arc::new(DbActivationSink::new(pool.clone())),
        CheckoutSettings {
            invoice_prefix: "INV".to_string(),
            return_url: "https://app.example.com/return".to_string(),
            callback_url: "https://app.example.com/callback".to_string(),
            payment_window: Duration::hours(24),
        },
    );

    (pool, service)
}

fn manual_checkout(buyer_id: Uuid, course_id: Uuid) -> CheckoutRequest {
    CheckoutRequest {
        buyer_id,
        buyer_name: "Jordan Buyer".to_string(),
        buyer_email: "jordan@example.com".to_string(),
        course_id,
        course_title: "Intro to Rust".to_string(),
        course_price: "100000".parse().unwrap(),
        mentor_id: Uuid::new_v4(),
        promo_code: None,
        method: PaymentMethod::Manual,
        channel: None,
    }
}

/// Inserts a pending gateway transaction directly, as checkout would have
/// after a successful payment-intent creation.
async fn seed_gateway_transaction(pool: &PgPool, reference: &str) -> coursepay_core::db::models::Transaction {
    let code = format!("INV20260826-{}", &Uuid::new_v4().simple().to_string()[..6].to_uppercase());
    queries::insert_transaction(
        pool,
        &NewTransaction {
            invoice_code: code.clone(),
            buyer_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            mentor_id: Uuid::new_v4(),
            promo_code_id: None,
            amount: "100000.00".parse().unwrap(),
            discount: "0.00".parse().unwrap(),
            total: "102000.00".parse().unwrap(),
            admin_fee: "2000.00".parse().unwrap(),
            mentor_earnings: "90000.00".parse().unwrap(),
            platform_fee: "10000.00".parse().unwrap(),
            payment_method: PaymentMethod::Gateway,
            payment_channel: Some("VA_BCA".to_string()),
            gateway_reference: Some(reference.to_string()),
            merchant_ref: Some(code),
            redirect_url: Some("https://pay.example.com/x".to_string()),
            payment_instructions: None,
            expires_at: Some(Utc::now() + Duration::hours(24)),
        },
    )
    .await
    .expect("failed to seed transaction")
}

fn signed_callback(reference: &str, status: &str) -> (Vec<u8>, String) {
    let body = format!(r#"{{"reference":"{}","status":"{}"}}"#, reference, status).into_bytes();
    let mut mac = HmacSha256::new_from_slice(CALLBACK_SECRET.as_bytes()).unwrap();
    mac.update(&body);
    let signature = hex::encode(mac.finalize().into_bytes());
    (body, signature)
}

#[tokio::test]
#[ignore]
async fn test_manual_checkout_creates_pending_transaction() {
    let (_pool, service) = setup().await;

    let outcome = service
        .checkout(manual_checkout(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap();

    let tx = outcome.transaction;
    assert_eq!(tx.status, "pending");
    assert!(outcome.redirect_url.is_none());
    assert!(tx.gateway_reference.is_none());
    assert!(tx.expires_at.is_none());
    assert!(tx.totals_consistent());
    assert_eq!(tx.total, "100000.00".parse::<BigDecimal>().unwrap());
    assert_eq!(tx.mentor_earnings, "90000.00".parse::<BigDecimal>().unwrap());
    assert_eq!(tx.platform_fee, "10000.00".parse::<BigDecimal>().unwrap());
}

#[tokio::test]
#[ignore]
async fn test_approve_manual_is_idempotent() {
    let (pool, service) = setup().await;

    let outcome = service
        .checkout(manual_checkout(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap();
    let id = outcome.transaction.id;

    let approved = service.approve_manual(id).await.unwrap();
    assert_eq!(approved.status, "paid");
    assert!(approved.paid_at.is_some());

    // Enrollment activated and earnings credited once
    assert!(
        queries::has_active_enrollment(&pool, approved.buyer_id, approved.course_id)
            .await
            .unwrap()
    );
    let credits: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM mentor_earnings WHERE transaction_id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(credits, 1);

    // Second approval is a no-op success, no double credit
    let again = service.approve_manual(id).await.unwrap();
    assert_eq!(again.status, "paid");
    let credits: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM mentor_earnings WHERE transaction_id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(credits, 1);
}

#[tokio::test]
#[ignore]
async fn test_checkout_rejected_for_enrolled_buyer() {
    let (_pool, service) = setup().await;
    let buyer_id = Uuid::new_v4();
    let course_id = Uuid::new_v4();

    let outcome = service
        .checkout(manual_checkout(buyer_id, course_id))
        .await
        .unwrap();
    service.approve_manual(outcome.transaction.id).await.unwrap();

    let second = service.checkout(manual_checkout(buyer_id, course_id)).await;
    assert!(matches!(second, Err(AppError::Validation(_))));
}

#[tokio::test]
#[ignore]
async fn test_duplicate_paid_callback_activates_once() {
    let (pool, service) = setup().await;
    let reference = format!("pg-{}", Uuid::new_v4().simple());
    let seeded = seed_gateway_transaction(&pool, &reference).await;

    let (body, signature) = signed_callback(&reference, "PAID");

    let first = service.handle_callback(&body, &signature).await.unwrap();
    assert!(matches!(first, CallbackAck::Processed { .. }));

    let second = service.handle_callback(&body, &signature).await.unwrap();
    assert!(matches!(second, CallbackAck::Replayed { .. }));

    let tx = queries::get_transaction(&pool, seeded.id).await.unwrap();
    assert_eq!(tx.status, "paid");
    assert!(tx.paid_at.is_some());

    let enrollments: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments WHERE buyer_id = $1 AND course_id = $2",
    )
    .bind(seeded.buyer_id)
    .bind(seeded.course_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(enrollments, 1);

    let credits: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM mentor_earnings WHERE transaction_id = $1")
            .bind(seeded.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(credits, 1);
}

#[tokio::test]
#[ignore]
async fn test_conflicting_callback_outcomes() {
    let (pool, service) = setup().await;
    let reference = format!("pg-{}", Uuid::new_v4().simple());
    let seeded = seed_gateway_transaction(&pool, &reference).await;

    let (paid_body, paid_sig) = signed_callback(&reference, "PAID");
    let (failed_body, failed_sig) = signed_callback(&reference, "FAILED");

    let first = service.handle_callback(&paid_body, &paid_sig).await.unwrap();
    assert!(matches!(first, CallbackAck::Processed { .. }));

    // The conflicting outcome is acknowledged but rejected by the guard
    let second = service
        .handle_callback(&failed_body, &failed_sig)
        .await
        .unwrap();
    assert!(matches!(second, CallbackAck::Conflict { .. }));

    let tx = queries::get_transaction(&pool, seeded.id).await.unwrap();
    assert_eq!(tx.status, "paid");
}

#[tokio::test]
#[ignore]
async fn test_invalid_signature_leaves_transaction_pending() {
    let (pool, service) = setup().await;
    let reference = format!("pg-{}", Uuid::new_v4().simple());
    let seeded = seed_gateway_transaction(&pool, &reference).await;

    let (body, _) = signed_callback(&reference, "PAID");
    let result = service.handle_callback(&body, "0".repeat(64).as_str()).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));

    let tx = queries::get_transaction(&pool, seeded.id).await.unwrap();
    assert_eq!(tx.status, "pending");
    assert!(tx.paid_at.is_none());
}

#[tokio::test]
#[ignore]
async fn test_unknown_reference_is_acknowledged_as_ignored() {
    let (_pool, service) = setup().await;
    let (body, signature) = signed_callback("pg-nobody-home", "PAID");

    let ack = service.handle_callback(&body, &signature).await.unwrap();
    assert!(matches!(ack, CallbackAck::Ignored { .. }));
}

#[tokio::test]
#[ignore]
async fn test_sweep_expires_overdue_pending_once() {
    let (pool, service) = setup().await;
    let reference = format!("pg-{}", Uuid::new_v4().simple());
    let seeded = seed_gateway_transaction(&pool, &reference).await;

    // Push the expiry into the past
    sqlx::query("UPDATE transactions SET expires_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(seeded.id)
        .execute(&pool)
        .await
        .unwrap();

    let swept = service.sweep_expired(Utc::now()).await.unwrap();
    assert!(swept >= 1);

    let tx = queries::get_transaction(&pool, seeded.id).await.unwrap();
    assert_eq!(tx.status, "expired");

    // A second pass finds nothing left to do for this row
    service.sweep_expired(Utc::now()).await.unwrap();
    let tx = queries::get_transaction(&pool, seeded.id).await.unwrap();
    assert_eq!(tx.status, "expired");

    // And a late paid callback now conflicts instead of settling
    let (body, signature) = signed_callback(&reference, "PAID");
    let ack = service.handle_callback(&body, &signature).await.unwrap();
    assert!(matches!(ack, CallbackAck::Conflict { .. }));
}

#[tokio::test]
#[ignore]
async fn test_refund_requires_paid_state() {
    let (_pool, service) = setup().await;

    let outcome = service
        .checkout(manual_checkout(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap();
    let id = outcome.transaction.id;

    // Refunding a pending transaction conflicts
    assert!(service.refund(id, None).await.is_err());

    service.approve_manual(id).await.unwrap();
    let refunded = service.refund(id, Some("buyer request")).await.unwrap();
    assert_eq!(refunded.status, "refund");
}
