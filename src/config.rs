use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

use crate::fees::FeePolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub gateway_base_url: String,
    pub gateway_merchant_code: String,
    pub gateway_api_key: String,
    pub gateway_callback_secret: String,
    pub admin_fee_pct: String,
    pub mentor_fee_pct: String,
    pub invoice_prefix: String,
    pub checkout_return_url: String,
    pub callback_url: String,
    pub payment_window_hours: i64,
    pub sweep_interval_secs: u64,
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            gateway_base_url: env::var("GATEWAY_BASE_URL")?,
            gateway_merchant_code: env::var("GATEWAY_MERCHANT_CODE")?,
            gateway_api_key: env::var("GATEWAY_API_KEY")?,
            gateway_callback_secret: env::var("GATEWAY_CALLBACK_SECRET")?,
            admin_fee_pct: env::var("ADMIN_FEE_PCT").unwrap_or_else(|_| "0".to_string()),
            mentor_fee_pct: env::var("MENTOR_FEE_PCT").unwrap_or_else(|_| "0".to_string()),
            invoice_prefix: env::var("INVOICE_PREFIX").unwrap_or_else(|_| "INV".to_string()),
            checkout_return_url: env::var("CHECKOUT_RETURN_URL")?,
            callback_url: env::var("CALLBACK_URL")?,
            payment_window_hours: env::var("PAYMENT_WINDOW_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
        };

        // Fail at startup on bad rates, not at checkout time
        config.fee_policy()?;
        url::Url::parse(&config.gateway_base_url)?;

        Ok(config)
    }

    /// Builds the validated fee policy from the configured rates.
    pub fn fee_policy(&self) -> anyhow::Result<FeePolicy> {
        let admin: BigDecimal = self
            .admin_fee_pct
            .parse()
            .map_err(|e| anyhow::anyhow!("ADMIN_FEE_PCT is not a decimal: {}", e))?;
        let mentor: BigDecimal = self
            .mentor_fee_pct
            .parse()
            .map_err(|e| anyhow::anyhow!("MENTOR_FEE_PCT is not a decimal: {}", e))?;
        Ok(FeePolicy::new(admin, mentor)?)
    }
}
