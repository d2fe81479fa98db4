//! Fee calculator: turns a course price, a discount and configured
//! percentage rates into a cent-exact amount breakdown.
//!
//! Pure and side-effect-free; all arithmetic is `BigDecimal` at scale 2 with
//! round-half-up, computed in a fixed order so the same inputs always produce
//! the same breakdown.

use bigdecimal::{BigDecimal, Zero};
use thiserror::Error;

use crate::domain::PaymentMethod;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("fee percentage '{0}' must be between 0 and 100")]
    InvalidPercentage(String),

    #[error("price must not be negative")]
    NegativePrice,

    #[error("discount must not be negative")]
    NegativeDiscount,
}

/// Configured fee rates, validated at construction.
///
/// `mentor_fee_pct` is the platform's cut of the mentor-attributable base;
/// `admin_fee_pct` is the gateway-side surcharge added on top of the total.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    admin_fee_pct: BigDecimal,
    mentor_fee_pct: BigDecimal,
}

/// Cent-exact breakdown of a single purchase.
///
/// Invariants: `total = (amount - discount) + admin_fee` and
/// `mentor_earnings + platform_fee = amount - discount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub amount: BigDecimal,
    pub discount: BigDecimal,
    pub total: BigDecimal,
    pub admin_fee: BigDecimal,
    pub mentor_earnings: BigDecimal,
    pub platform_fee: BigDecimal,
}

impl FeePolicy {
    pub fn new(admin_fee_pct: BigDecimal, mentor_fee_pct: BigDecimal) -> Result<Self, FeeError> {
        validate_percentage(&admin_fee_pct)?;
        validate_percentage(&mentor_fee_pct)?;
        Ok(Self {
            admin_fee_pct,
            mentor_fee_pct,
        })
    }

    /// Computes the breakdown for one purchase.
    ///
    /// A discount larger than the price is capped at the price, not rejected;
    /// upstream promo validation owns that concern. Negative inputs are hard
    /// errors.
    pub fn quote(
        &self,
        price: &BigDecimal,
        discount: &BigDecimal,
        method: PaymentMethod,
    ) -> Result<FeeBreakdown, FeeError> {
        if price < &BigDecimal::zero() {
            return Err(FeeError::NegativePrice);
        }
        if discount < &BigDecimal::zero() {
            return Err(FeeError::NegativeDiscount);
        }

        let amount = price.with_scale(2);
        let discount = if discount > price {
            amount.clone()
        } else {
            discount.with_scale(2)
        };

        let base = (&amount - &discount).with_scale(2);

        let admin_fee = match method {
            PaymentMethod::Gateway => percent_of(&base, &self.admin_fee_pct),
            PaymentMethod::Manual => BigDecimal::zero().with_scale(2),
        };

        let total = (&base + &admin_fee).with_scale(2);
        let platform_fee = percent_of(&base, &self.mentor_fee_pct);
        let mentor_earnings = (&base - &platform_fee).with_scale(2);

        Ok(FeeBreakdown {
            amount,
            discount,
            total,
            admin_fee,
            mentor_earnings,
            platform_fee,
        })
    }
}

fn validate_percentage(pct: &BigDecimal) -> Result<(), FeeError> {
    if pct < &BigDecimal::zero() || pct > &BigDecimal::from(100) {
        return Err(FeeError::InvalidPercentage(pct.to_string()));
    }
    Ok(())
}

fn percent_of(base: &BigDecimal, pct: &BigDecimal) -> BigDecimal {
    round_to_cents(&(base * pct / BigDecimal::from(100)))
}

/// Round-half-up to 2 fractional digits. Only valid for non-negative values;
/// `with_scale` truncates toward zero, so adding half a cent first gives
/// half-up behavior.
pub fn round_to_cents(value: &BigDecimal) -> BigDecimal {
    let half = BigDecimal::from(1) / BigDecimal::from(2);
    let cents = (value * BigDecimal::from(100) + half).with_scale(0);
    (cents / BigDecimal::from(100)).with_scale(2)
}
