pub mod invoice;
pub mod transaction;

pub use transaction::{
    classify_transition, PaymentMethod, TransactionStatus, TransitionCheck, TransitionError,
};
