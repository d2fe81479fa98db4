use coursepay_core::gateway::GatewayClient;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn client(secret: &str) -> GatewayClient {
    GatewayClient::new(
        "https://gateway.example.com".to_string(),
        "M-001".to_string(),
        "api-key".to_string(),
        secret.to_string(),
    )
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[test]
fn test_hmac_signature_generation() {
    let signature = sign("test_secret_key", br#"{"reference":"pg-1","status":"PAID"}"#);

    // SHA256 produces 32 bytes = 64 hex chars
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_valid_callback_signature_accepted() {
    let body = br#"{"reference":"pg-1","merchant_ref":"INV20260826-ABC123","status":"PAID"}"#;
    let signature = sign("test_secret_key", body);

    assert!(client("test_secret_key").verify_callback(body, &signature));
}

#[test]
fn test_byte_altered_body_rejected() {
    let body = br#"{"reference":"pg-1","status":"PAID"}"#;
    let signature = sign("test_secret_key", body);

    // Flip a single byte in the payload the signature was computed over
    let mut altered = body.to_vec();
    altered[10] ^= 0x01;

    assert!(!client("test_secret_key").verify_callback(&altered, &signature));
}

#[test]
fn test_signature_from_wrong_secret_rejected() {
    let body = br#"{"reference":"pg-1","status":"PAID"}"#;
    let signature = sign("some_other_secret", body);

    assert!(!client("test_secret_key").verify_callback(body, &signature));
}

#[test]
fn test_malformed_signatures_rejected() {
    let verifier = client("test_secret_key");
    let body = br#"{"reference":"pg-1","status":"PAID"}"#;

    assert!(!verifier.verify_callback(body, ""));
    assert!(!verifier.verify_callback(body, "zz-not-hex"));
    assert!(!verifier.verify_callback(body, "deadbeef")); // too short
}

#[test]
fn test_empty_body_still_needs_matching_signature() {
    let verifier = client("test_secret_key");
    let signature = sign("test_secret_key", b"");

    assert!(verifier.verify_callback(b"", &signature));
    assert!(!verifier.verify_callback(b"{}", &signature));
}
