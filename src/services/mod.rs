pub mod activation;
pub mod settlement;
pub mod sweeper;

pub use activation::{ActivationSink, DbActivationSink};
pub use settlement::{
    CallbackAck, CheckoutOutcome, CheckoutRequest, CheckoutSettings, SettlementService,
};
