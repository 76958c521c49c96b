//! ECPay all-in-one checkout protocol for the Shortly backend.
//!
//! Implements the merchant side of the gateway's AioCheckOut flow: signing
//! outbound checkout requests with a `CheckMacValue` integrity code and
//! verifying the asynchronous payment notifications the gateway POSTs back.
//!
//! # Flow
//!
//! - **Checkout** ([`build_checkout`]) — turn an order into the signed
//!   parameter set the buyer's browser auto-submits to the gateway
//! - **Notification** ([`verify_notification`]) — authenticate an inbound
//!   callback and normalize it into a [`PaymentNotification`]
//! - **Acknowledgment** — the gateway expects a literal `1|OK` body to stop
//!   redelivery, or `0|<reason>` to retry
//!
//! Everything here is pure — no I/O, no clock beyond trade-date stamping —
//! so callback handling can be unit-tested against literal payloads.
//! Persistence and orchestration live in the server crate.

pub mod callback;
pub mod checkout;
pub mod constants;
pub mod error;
pub mod mac;

pub use callback::{verify_notification, PaymentNotification};
pub use checkout::{
    build_checkout, build_checkout_at, render_form_html, CheckoutRequest, CheckoutUrls,
};
pub use constants::MerchantConfig;
pub use error::EcpayError;
