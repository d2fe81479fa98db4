use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("payment rejected by gateway: {0}")]
    Rejected(String),
    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

/// A payment channel offered by the gateway (bank transfer, e-wallet, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
}

/// Outbound payment-intent creation request. `invoice_code` doubles as the
/// idempotency key on the gateway side.
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub invoice_code: String,
    pub amount: BigDecimal,
    pub channel: String,
    pub customer_name: String,
    pub customer_email: String,
    pub item_description: String,
    pub return_url: String,
    pub callback_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Correlation data returned by a successful payment creation.
#[derive(Debug, Clone)]
pub struct PaymentHandle {
    pub external_reference: String,
    pub redirect_url: String,
    pub payment_instructions: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
}

/// Remote view of a transaction, used by reconciliation. Provider errors map
/// to `Unknown`, never into caller error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Paid,
    Expired,
    Failed,
    Unknown,
}

#[derive(Debug, Serialize)]
struct InvoiceBody<'a> {
    merchant_code: &'a str,
    merchant_ref: &'a str,
    amount: String,
    payment_channel: &'a str,
    customer_name: &'a str,
    customer_email: &'a str,
    product_description: &'a str,
    return_url: &'a str,
    callback_url: &'a str,
    expired_time: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    reference: String,
    checkout_url: String,
    #[serde(default)]
    instructions: Option<serde_json::Value>,
    expired_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
    channels: Vec<Channel>,
}

/// HTTP client for the external payment gateway.
///
/// Stateless aside from credentials; safe to call concurrently without
/// coordination. All calls go through a circuit breaker so a flapping
/// provider fails fast instead of tying up checkout requests.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    merchant_code: String,
    api_key: String,
    callback_secret: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl GatewayClient {
    pub fn new(
        base_url: String,
        merchant_code: String,
        api_key: String,
        callback_secret: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        GatewayClient {
            client,
            base_url,
            merchant_code,
            api_key,
            callback_secret,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// Lists available payment channels. Degrades to an empty list on any
    /// provider failure; manual payment remains available regardless.
    pub async fn list_channels(&self) -> Vec<Channel> {
        let url = format!(
            "{}/v2/merchant/payment-channels",
            self.base_url.trim_end_matches('/')
        );

        let result: Result<ChannelsResponse, GatewayError> = async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(GatewayError::InvalidResponse(format!(
                    "channel listing returned {}",
                    response.status()
                )));
            }

            Ok(response.json::<ChannelsResponse>().await?)
        }
        .await;

        match result {
            Ok(body) => body.channels,
            Err(e) => {
                tracing::warn!("channel listing degraded to empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Creates a payment intent at the gateway. The request is signed with an
    /// HMAC over `(merchant_code, invoice_code, amount)`.
    pub async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<PaymentHandle, GatewayError> {
        let url = format!("{}/v2/invoice", self.base_url.trim_end_matches('/'));
        let amount = request.amount.with_scale(2).to_string();
        let signature = self.request_signature(&request.invoice_code, &amount);

        let body = InvoiceBody {
            merchant_code: &self.merchant_code,
            merchant_ref: &request.invoice_code,
            amount,
            payment_channel: &request.channel,
            customer_name: &request.customer_name,
            customer_email: &request.customer_email,
            product_description: &request.item_description,
            return_url: &request.return_url,
            callback_url: &request.callback_url,
            expired_time: request.expires_at.to_rfc3339(),
            signature,
        };

        let client = self.client.clone();
        let api_key = self.api_key.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(GatewayError::Rejected(format!("{}: {}", status, detail)));
                }

                let invoice = response.json::<InvoiceResponse>().await?;
                Ok(PaymentHandle {
                    external_reference: invoice.reference,
                    redirect_url: invoice.checkout_url,
                    payment_instructions: invoice.instructions,
                    expires_at: invoice.expired_time,
                })
            })
            .await;

        match result {
            Ok(handle) => Ok(handle),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen(
                "gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Fetches the remote status of a transaction for reconciliation.
    /// Provider errors come back as `Unknown`, never as an error.
    pub async fn fetch_status(&self, external_reference: &str) -> RemoteStatus {
        let url = format!(
            "{}/v2/transaction/{}",
            self.base_url.trim_end_matches('/'),
            external_reference
        );

        let result: Result<StatusResponse, GatewayError> = async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(GatewayError::InvalidResponse(format!(
                    "status fetch returned {}",
                    response.status()
                )));
            }

            Ok(response.json::<StatusResponse>().await?)
        }
        .await;

        match result {
            Ok(body) => match body.status.as_str() {
                "PENDING" | "UNPAID" => RemoteStatus::Pending,
                "PAID" | "SETTLED" => RemoteStatus::Paid,
                "EXPIRED" => RemoteStatus::Expired,
                "FAILED" | "REFUSED" => RemoteStatus::Failed,
                other => {
                    tracing::warn!(status = other, "unrecognized remote status");
                    RemoteStatus::Unknown
                }
            },
            Err(e) => {
                tracing::warn!(reference = external_reference, "status fetch failed: {}", e);
                RemoteStatus::Unknown
            }
        }
    }

    /// Recomputes the callback HMAC over the raw body and compares it in
    /// constant time against the supplied hex signature. Any malformed input
    /// is a rejection.
    pub fn verify_callback(&self, raw_body: &[u8], supplied_signature: &str) -> bool {
        let supplied = match hex::decode(supplied_signature.trim()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let mut mac = match HmacSha256::new_from_slice(self.callback_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(raw_body);

        // verify_slice is constant-time
        mac.verify_slice(&supplied).is_ok()
    }

    fn request_signature(&self, invoice_code: &str, amount: &str) -> String {
        let mut mac = match HmacSha256::new_from_slice(self.callback_secret.as_bytes()) {
            Ok(mac) => mac,
            // HMAC-SHA256 accepts keys of any length; unreachable in practice
            Err(_) => return String::new(),
        };
        mac.update(self.merchant_code.as_bytes());
        mac.update(invoice_code.as_bytes());
        mac.update(amount.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
