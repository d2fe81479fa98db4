mod client;

pub use client::{
    Channel, CreatePaymentRequest, GatewayClient, GatewayError, PaymentHandle, RemoteStatus,
};
