use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use coursepay_core::gateway::{CreatePaymentRequest, GatewayClient, GatewayError, RemoteStatus};

fn client(base_url: String) -> GatewayClient {
    GatewayClient::new(
        base_url,
        "M-001".to_string(),
        "api-key".to_string(),
        "callback-secret".to_string(),
    )
}

fn payment_request() -> CreatePaymentRequest {
    CreatePaymentRequest {
        invoice_code: "INV20260826-ABC123".to_string(),
        amount: "102000.00".parse::<BigDecimal>().unwrap(),
        channel: "VA_BCA".to_string(),
        customer_name: "Jordan Buyer".to_string(),
        customer_email: "jordan@example.com".to_string(),
        item_description: "Intro to Rust".to_string(),
        return_url: "https://app.example.com/return".to_string(),
        callback_url: "https://app.example.com/callback".to_string(),
        expires_at: Utc::now() + Duration::hours(24),
    }
}

#[tokio::test]
async fn test_create_payment_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/invoice")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "reference": "pg-001",
                "checkout_url": "https://pay.example.com/pg-001",
                "instructions": {"va_number": "1234567890"},
                "expired_time": "2026-08-27T12:00:00Z"
            }"#,
        )
        .create_async()
        .await;

    let handle = client(server.url())
        .create_payment(&payment_request())
        .await
        .unwrap();

    assert_eq!(handle.external_reference, "pg-001");
    assert_eq!(handle.redirect_url, "https://pay.example.com/pg-001");
    assert_eq!(
        handle.payment_instructions.unwrap()["va_number"],
        "1234567890"
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_create_payment_provider_rejection() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v2/invoice")
        .with_status(422)
        .with_body(r#"{"error":"channel unavailable"}"#)
        .create_async()
        .await;

    let result = client(server.url()).create_payment(&payment_request()).await;

    match result {
        Err(GatewayError::Rejected(detail)) => assert!(detail.contains("422")),
        other => panic!("expected rejection, got {:?}", other.map(|h| h.external_reference)),
    }
}

#[tokio::test]
async fn test_fetch_status_maps_provider_vocabulary() {
    let mut server = mockito::Server::new_async().await;
    for (provider_status, expected) in [
        ("PAID", RemoteStatus::Paid),
        ("SETTLED", RemoteStatus::Paid),
        ("EXPIRED", RemoteStatus::Expired),
        ("FAILED", RemoteStatus::Failed),
        ("UNPAID", RemoteStatus::Pending),
        ("SOMETHING_NEW", RemoteStatus::Unknown),
    ] {
        let mock = server
            .mock("GET", "/v2/transaction/pg-001")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"status":"{}"}}"#, provider_status))
            .create_async()
            .await;

        let status = client(server.url()).fetch_status("pg-001").await;
        assert_eq!(status, expected, "provider status {}", provider_status);
        mock.remove_async().await;
    }
}

#[tokio::test]
async fn test_fetch_status_degrades_to_unknown_on_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v2/transaction/pg-404")
        .with_status(500)
        .create_async()
        .await;

    let status = client(server.url()).fetch_status("pg-404").await;
    assert_eq!(status, RemoteStatus::Unknown);
}

#[tokio::test]
async fn test_list_channels_success() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v2/merchant/payment-channels")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"channels":[
                {"code":"VA_BCA","name":"BCA Virtual Account","active":true},
                {"code":"EWALLET_X","name":"X Wallet","active":false}
            ]}"#,
        )
        .create_async()
        .await;

    let channels = client(server.url()).list_channels().await;
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].code, "VA_BCA");
    assert!(channels[0].active);
}

#[tokio::test]
async fn test_list_channels_degrades_to_empty_on_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v2/merchant/payment-channels")
        .with_status(503)
        .create_async()
        .await;

    let channels = client(server.url()).list_channels().await;
    assert!(channels.is_empty());
}
