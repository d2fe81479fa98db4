//! Transaction status state machine and payment-method vocabulary.
//! Framework-agnostic; the persisted entity lives in `db::models`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle state of a purchase transaction.
///
/// `Pending` is the only mutable state. `Expired` and `Failed` are terminal;
/// `Paid` only allows a later admin-driven `Refund`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Paid,
    Expired,
    Failed,
    Refund,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "paid" => Ok(TransactionStatus::Paid),
            "expired" => Ok(TransactionStatus::Expired),
            "failed" => Ok(TransactionStatus::Failed),
            "refund" => Ok(TransactionStatus::Refund),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// How the buyer pays: through the external gateway, or a manual transfer
/// confirmed by an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Gateway,
    Manual,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Gateway => "gateway",
            PaymentMethod::Manual => "manual",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gateway" => Ok(PaymentMethod::Gateway),
            "manual" => Ok(PaymentMethod::Manual),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from '{from}' to '{to}'")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Result of checking a requested transition against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// The transition is legal and would change state.
    Apply,
    /// The target state is already held. Idempotent no-op, still a success,
    /// but callers must not fire side effects again.
    Replay,
}

/// State machine guard. Distinguishes "already handled" (same target state,
/// `Replay`) from "conflicting state" (`InvalidTransition`) so duplicate
/// callback deliveries and genuinely conflicting outcomes get different
/// treatment.
pub fn classify_transition(
    current: TransactionStatus,
    target: TransactionStatus,
) -> Result<TransitionCheck, TransitionError> {
    use TransactionStatus::*;

    if current == target {
        return Ok(TransitionCheck::Replay);
    }

    let legal = matches!(
        (current, target),
        (Pending, Paid) | (Pending, Expired) | (Pending, Failed) | (Paid, Refund)
    );

    if legal {
        Ok(TransitionCheck::Apply)
    } else {
        Err(TransitionError::InvalidTransition {
            from: current.as_str(),
            to: target.as_str(),
        })
    }
}
